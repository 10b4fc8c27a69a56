use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};

use crate::models::Grade;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 160;
const MARGIN: u32 = 32;
const BAR_HEIGHT: u32 = 48;

const BACKGROUND: Rgb<u8> = Rgb([248, 249, 250]);
const TRACK: Rgb<u8> = Rgb([222, 226, 230]);
const CHANGE_MARK: Rgb<u8> = Rgb([52, 58, 64]);

/// Everything needed to draw one grade-change card. The text fields are for
/// renderers that can draw text; [`BarRenderer`] ignores them and the title
/// and change text reach the user in the image caption instead.
#[derive(Debug, Clone)]
pub struct GradeCard {
    pub old_grade: Grade,
    pub new_grade: Grade,
    pub current: f64,
    pub might_be: f64,
    pub title: String,
    pub change_text: String,
    pub side_text: String,
}

pub trait Renderer: Send + Sync {
    /// Writes an image file and returns its path; the caller owns the file.
    /// The image need not carry the card's texts.
    fn render_grade_change(&self, card: &GradeCard) -> Result<PathBuf>;
}

/// Removes the rendered file when dropped, whichever way delivery went.
#[derive(Debug)]
pub struct RenderedImage {
    path: PathBuf,
}

impl RenderedImage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases ownership of the file without deleting it.
    pub fn into_path(mut self) -> PathBuf {
        std::mem::take(&mut self.path)
    }
}

impl Drop for RenderedImage {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Failed to delete rendered image");
            }
        }
    }
}

/// Colour band of the portal's grading scale for a share of the achievable total.
fn band_color(percent: f64) -> Rgb<u8> {
    match percent {
        p if p < 50.0 => Rgb([220, 53, 69]),
        p if p < 70.0 => Rgb([253, 126, 20]),
        p if p < 86.0 => Rgb([160, 200, 40]),
        _ => Rgb([40, 167, 69]),
    }
}

fn percent_of(current: f64, might_be: f64) -> f64 {
    if might_be <= 0.0 {
        0.0
    } else {
        (current / might_be * 100.0).clamp(0.0, 100.0)
    }
}

/// Draws a progress bar of `current / might_be` as a PNG, with a tick at the
/// score before the change. No text is drawn.
pub struct BarRenderer {
    output_dir: PathBuf,
}

impl BarRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn draw(card: &GradeCard) -> RgbImage {
        let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
        let track_width = WIDTH - 2 * MARGIN;
        let top = (HEIGHT - BAR_HEIGHT) / 2;

        let percent = percent_of(card.current, card.might_be);
        let filled = (f64::from(track_width) * percent / 100.0).round() as u32;
        let fill = band_color(percent);

        for x in 0..track_width {
            let color = if x < filled { fill } else { TRACK };
            for y in top..top + BAR_HEIGHT {
                img.put_pixel(MARGIN + x, y, color);
            }
        }

        // Tick where the score stood before the change.
        if let Some(new) = card.new_grade.as_number() {
            let before = card.current - new + card.old_grade.as_number().unwrap_or(0.0);
            let x = (f64::from(track_width) * percent_of(before, card.might_be) / 100.0).round() as u32;
            let x = MARGIN + x.min(track_width - 1);
            for y in top.saturating_sub(8)..top + BAR_HEIGHT + 8 {
                img.put_pixel(x, y, CHANGE_MARK);
            }
        }

        img
    }
}

impl Renderer for BarRenderer {
    fn render_grade_change(&self, card: &GradeCard) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let path = tempfile::Builder::new()
            .prefix("grade-")
            .suffix(".png")
            .tempfile_in(&self.output_dir)
            .context("Failed to create image file")?
            .into_temp_path()
            .keep()
            .context("Failed to keep image file")?;
        let image = RenderedImage::new(path);

        let mut bytes = Cursor::new(Vec::new());
        Self::draw(card)
            .write_to(&mut bytes, ImageFormat::Png)
            .context("Failed to encode image")?;
        fs::write(image.path(), bytes.into_inner())
            .with_context(|| format!("Failed to write {}", image.path().display()))?;

        tracing::debug!(
            path = %image.path().display(),
            title = %card.title,
            change = %card.change_text,
            side = %card.side_text,
            "Rendered grade card"
        );
        Ok(image.into_path())
    }
}
