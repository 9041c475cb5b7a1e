//! Screenshot capture through `exec-out screencap`

use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use tracing::debug;

use crate::error::Result;

use super::channel::{DeviceChannel, ExecOptions};

/// A captured device screenshot
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub base64_data: String,
    pub width: u32,
    pub height: u32,
}

/// Captures the screen as PNG, in memory.
pub async fn get_screenshot(channel: &DeviceChannel) -> Result<Screenshot> {
    let png = channel
        .exec_bytes(&["exec-out", "screencap", "-p"], &ExecOptions::default())
        .await?;
    let image = image::load_from_memory(&png)?;
    debug!(width = image.width(), height = image.height(), "screenshot captured");
    Ok(Screenshot {
        base64_data: general_purpose::STANDARD.encode(&png),
        width: image.width(),
        height: image.height(),
    })
}

/// Captures the screen and writes the PNG to a local path.
pub async fn save_screenshot(channel: &DeviceChannel, destination: &Path) -> Result<()> {
    let png = channel
        .exec_bytes(&["exec-out", "screencap", "-p"], &ExecOptions::default())
        .await?;
    std::fs::write(destination, &png)?;
    Ok(())
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::{Cursor, Write};
    use std::os::unix::fs::PermissionsExt;

    fn fixture_png(dir: &tempfile::TempDir, width: u32, height: u32) -> std::path::PathBuf {
        let path = dir.path().join("screen.png");
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(width, height, Rgb([12, 34, 56]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn fake_adb(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("fake-adb");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn screenshot_reports_decoded_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let png = fixture_png(&dir, 8, 4);
        let adb = fake_adb(&dir, &format!("cat {}", png.display()));
        let channel = DeviceChannel::with_path(&adb);
        let shot = get_screenshot(&channel).await.unwrap();
        assert_eq!((shot.width, shot.height), (8, 4));
        assert!(!shot.base64_data.is_empty());
    }

    #[tokio::test]
    async fn save_writes_raw_png_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let png = fixture_png(&dir, 2, 2);
        let adb = fake_adb(&dir, &format!("cat {}", png.display()));
        let channel = DeviceChannel::with_path(&adb);
        let destination = dir.path().join("out.png");
        save_screenshot(&channel, &destination).await.unwrap();
        assert_eq!(
            std::fs::read(&destination).unwrap(),
            std::fs::read(&png).unwrap()
        );
    }
}
