use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use synview_core::{SourceLine, SourcePosition, SyncBackend, SyncNode};
use tracing::{debug, instrument, trace};

/// Sync-map queries answered by the `synctex` command-line tool.
///
/// The tool reads the `.synctex.gz` file sitting next to the PDF, so the
/// document must have been compiled with synctex enabled.
#[derive(Debug, Clone)]
pub struct SynctexCli {
    program: PathBuf,
}

impl Default for SynctexCli {
    fn default() -> Self {
        Self::new("synctex")
    }
}

impl SynctexCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, document: &Path, args: &[String]) -> Result<String> {
        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(dir) = document.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!(status = ?output.status, %stdout, "synctex finished");

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(stdout)
    }
}

impl SyncBackend for SynctexCli {
    #[instrument(skip(self))]
    fn forward(&self, document: &Path, position: &SourcePosition) -> Result<Vec<SyncNode>> {
        let input = format!(
            "{}:{}:{}",
            position.line,
            position.column,
            position.file.display()
        );
        let args = [
            "view".to_owned(),
            "-i".to_owned(),
            input,
            "-o".to_owned(),
            document.display().to_string(),
        ];
        let stdout = self.run(document, &args)?;
        let nodes = parse_view_output(&stdout);
        debug!(count = nodes.len(), "forward sync candidates");
        Ok(nodes)
    }

    #[instrument(skip(self))]
    fn inverse(&self, document: &Path, page: usize, x: f64, y: f64) -> Result<Option<SourceLine>> {
        let output = format!("{}:{:.2}:{:.2}:{}", page + 1, x, y, document.display());
        let args = ["edit".to_owned(), "-o".to_owned(), output];
        let stdout = self.run(document, &args)?;
        Ok(parse_edit_output(&stdout))
    }
}

fn records(output: &str) -> impl Iterator<Item = (&str, &str)> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
}

#[derive(Default)]
struct PartialNode {
    page: Option<usize>,
    h: Option<f64>,
    v: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
}

impl PartialNode {
    fn finish(self) -> Option<SyncNode> {
        let page = self.page?;
        let height = self.height?;
        Some(SyncNode::new(
            page,
            self.h?,
            self.v? - height,
            self.width?,
            height,
        ))
    }
}

/// Parses `synctex view` output into candidates, in the order reported.
///
/// Each `Page:` record opens a candidate; `h`/`v` locate the box baseline
/// and `W`/`H` its size, so the top edge sits at `v - H`.
pub fn parse_view_output(output: &str) -> Vec<SyncNode> {
    let mut nodes = Vec::new();
    let mut current: Option<PartialNode> = None;

    for (key, value) in records(output) {
        if key == "Page" {
            if let Some(node) = current.take().and_then(PartialNode::finish) {
                nodes.push(node);
            }
            current = value
                .parse::<usize>()
                .ok()
                .and_then(|page| page.checked_sub(1))
                .map(|page| PartialNode {
                    page: Some(page),
                    ..PartialNode::default()
                });
            continue;
        }

        let Some(node) = current.as_mut() else {
            continue;
        };
        let number = value.parse::<f64>().ok();
        match key {
            "h" => node.h = number,
            "v" => node.v = number,
            "W" => node.width = number,
            "H" => node.height = number,
            _ => {}
        }
    }

    if let Some(node) = current.and_then(PartialNode::finish) {
        nodes.push(node);
    }
    nodes
}

/// Parses `synctex edit` output into the first reported source line.
pub fn parse_edit_output(output: &str) -> Option<SourceLine> {
    let mut file = None;
    for (key, value) in records(output) {
        match key {
            "Input" if file.is_none() && !value.is_empty() => file = Some(PathBuf::from(value)),
            "Line" => {
                let line = value.parse::<i64>().ok()?;
                let file = file.take()?;
                if line < 1 {
                    return None;
                }
                return Some(SourceLine {
                    file,
                    line: u32::try_from(line).ok()?,
                });
            }
            _ => {}
        }
    }
    None
}
