//! Removal of run output directories.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info};

use tackle_core::Result;

/// Report directory the worker writes under a run's output path.
pub const REPORTS_DIR: &str = "reports";
/// Report entry page the worker writes under a run's output path.
pub const INDEX_PAGE: &str = "index.html";

/// Delete a run's whole output directory. A missing directory is not an error.
pub async fn remove_output(output_path: &str) -> Result<()> {
    if output_path.is_empty() {
        return Ok(());
    }
    match tokio::fs::remove_dir_all(output_path).await {
        Ok(()) => {
            info!(output_path, "Output directory removed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(output_path, "Output directory already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete only the generated reports of a run, keeping its other output.
pub async fn remove_reports(output_path: &str) -> Result<()> {
    if output_path.is_empty() {
        return Ok(());
    }
    let base = Path::new(output_path);

    match tokio::fs::remove_dir_all(base.join(REPORTS_DIR)).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    match tokio::fs::remove_file(base.join(INDEX_PAGE)).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    info!(output_path, "Reports removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(dir: &Path) {
        std::fs::create_dir_all(dir.join(REPORTS_DIR)).unwrap();
        std::fs::write(dir.join(REPORTS_DIR).join("a.html"), "a").unwrap();
        std::fs::write(dir.join(INDEX_PAGE), "index").unwrap();
        std::fs::create_dir_all(dir.join("graph")).unwrap();
        std::fs::write(dir.join("graph").join("graph.json"), "{}").unwrap();
    }

    #[tokio::test]
    async fn test_remove_output() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("42");
        populate(&out);

        remove_output(out.to_str().unwrap()).await.unwrap();
        assert!(!out.exists());
        // Second removal is a no-op.
        remove_output(out.to_str().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_reports_keeps_graph() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("7");
        populate(&out);

        remove_reports(out.to_str().unwrap()).await.unwrap();
        assert!(!out.join(REPORTS_DIR).exists());
        assert!(!out.join(INDEX_PAGE).exists());
        assert!(out.join("graph").join("graph.json").exists());
    }

    #[tokio::test]
    async fn test_missing_paths_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("missing");
        remove_reports(out.to_str().unwrap()).await.unwrap();
        remove_output("").await.unwrap();
    }
}
