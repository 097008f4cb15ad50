//! Screenshot capture of the virtual display via spectacle
//!
//! Spectacle runs inside the session environment in background mode and
//! writes a PNG we read back; `image` only probes the header for the size.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use base64::Engine;

use crate::core::environment::{SessionEnv, require_tool, run_tool_checked};
use crate::error::{Error, Result};

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// A captured PNG
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Screenshot {
    pub fn from_png(png: Vec<u8>) -> Result<Self> {
        if png.is_empty() {
            return Err(Error::tool("spectacle", "produced no output"));
        }
        let (width, height) = image::ImageReader::new(Cursor::new(&png))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| Error::tool("spectacle", format!("output is not a readable image: {e}")))?;
        Ok(Self { png, width, height })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.png)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.png)?;
        Ok(())
    }
}

fn scratch_path() -> PathBuf {
    std::env::temp_dir().join(format!("kwin-marionette-shot-{}.png", uuid::Uuid::new_v4()))
}

/// Capture the full virtual screen
pub fn capture(env: &SessionEnv, include_cursor: bool) -> Result<Screenshot> {
    require_tool("spectacle")?;
    let output = scratch_path();

    let mut cmd = Command::new("spectacle");
    cmd.args(["-b", "-f", "-n", "-o"]).arg(&output);
    if include_cursor {
        cmd.arg("-p");
    }
    env.apply(&mut cmd);

    let result = run_tool_checked("spectacle", &mut cmd, CAPTURE_TIMEOUT).and_then(|_| {
        let png = std::fs::read(&output)
            .map_err(|_| Error::tool("spectacle", "produced no output"))?;
        Screenshot::from_png(png)
    });
    let _ = std::fs::remove_file(&output);

    let shot = result?;
    tracing::debug!(width = shot.width, height = shot.height, "Captured screenshot");
    Ok(shot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::new(width, height);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn dimensions_come_from_the_png() {
        let shot = Screenshot::from_png(png(64, 32)).unwrap();
        assert_eq!((shot.width, shot.height), (64, 32));
        assert!(!shot.to_base64().is_empty());
    }

    #[test]
    fn empty_or_garbage_output_is_a_tool_error() {
        assert!(matches!(
            Screenshot::from_png(Vec::new()),
            Err(Error::ExternalTool { .. })
        ));
        assert!(Screenshot::from_png(b"not a png".to_vec()).is_err());
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/shot.png");
        Screenshot::from_png(png(2, 2)).unwrap().save(&path).unwrap();
        assert!(path.exists());
    }
}
