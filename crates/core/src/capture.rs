use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use parallax_config::CaptureConfig;

use crate::driver::{Page, Rect, Viewport};

const FOCUS_SCRIPT_TEMPLATE: &str = r#"
() => {
  const dialog = document.querySelector('[role="dialog"]');
  if (!dialog) return null;
  const rect = dialog.getBoundingClientRect();
  return {
    x: Math.max(0, rect.x - PAD),
    y: Math.max(0, rect.y - PAD),
    width: rect.width + PAD * 2,
    height: rect.height + PAD * 2
  };
}
"#;

const REDACTION_REGIONS_SCRIPT: &str = r#"
(selectors) => {
  const out = [];
  selectors.forEach((sel) => {
    try {
      document.querySelectorAll(sel).forEach((el) => {
        const rect = el.getBoundingClientRect();
        if (rect.width && rect.height) {
          out.push({ x: rect.x, y: rect.y, width: rect.width, height: rect.height });
        }
      });
    } catch (err) {}
  });
  return out;
}
"#;

/// Write the screenshot set for one state: always a full-page desktop shot,
/// tablet and mobile when multi-viewport is on, and a focus crop around an
/// open dialog. Returns viewport name → filename.
pub async fn capture_screenshots(
    page: &dyn Page,
    cfg: &CaptureConfig,
    save_dir: Option<&Path>,
    index: usize,
    has_modal: bool,
) -> Result<BTreeMap<String, String>> {
    let mut screenshots = BTreeMap::new();
    let Some(save_dir) = save_dir else {
        return Ok(screenshots);
    };
    std::fs::create_dir_all(save_dir).context("Failed to create screenshot dir")?;

    let desktop = format!("{index:02}_desktop.png");
    page.screenshot(&save_dir.join(&desktop), true, None).await?;
    redact_viewport(page, cfg, &save_dir.join(&desktop)).await;
    screenshots.insert("desktop".to_string(), desktop);

    if cfg.multi_viewport {
        let tablet = alternate_viewport_screenshot(
            page,
            cfg,
            save_dir,
            index,
            "tablet",
            cfg.tablet_viewport.into(),
        )
        .await?;
        screenshots.insert("tablet".to_string(), tablet);

        let mobile = alternate_viewport_screenshot(
            page,
            cfg,
            save_dir,
            index,
            "mobile",
            cfg.mobile_viewport.into(),
        )
        .await?;
        screenshots.insert("mobile".to_string(), mobile);
    }

    if has_modal {
        if let Some(focus) = focus_crop(page, cfg, save_dir, index).await? {
            screenshots.insert("focus".to_string(), focus);
        }
    }

    Ok(screenshots)
}

/// The browser has one viewport at a time: save it, resize, shoot, restore.
/// An unknown saved viewport restores to the configured desktop default.
async fn alternate_viewport_screenshot(
    page: &dyn Page,
    cfg: &CaptureConfig,
    save_dir: &Path,
    index: usize,
    viewport_name: &str,
    viewport: Viewport,
) -> Result<String> {
    let original = page.viewport_size();
    page.set_viewport_size(viewport).await?;

    let filename = format!("{index:02}_{viewport_name}.png");
    let out = save_dir.join(&filename);
    let shot = page.screenshot(&out, true, None).await;
    if shot.is_ok() {
        redact_viewport(page, cfg, &out).await;
    }

    let restore = original.unwrap_or_else(|| cfg.desktop_viewport.into());
    page.set_viewport_size(restore).await?;
    shot?;
    Ok(filename)
}

async fn focus_crop(
    page: &dyn Page,
    cfg: &CaptureConfig,
    save_dir: &Path,
    index: usize,
) -> Result<Option<String>> {
    let script =
        FOCUS_SCRIPT_TEMPLATE.replace("PAD", &cfg.crop_focus_padding_px.to_string());
    let bounds = page.evaluate(&script, None).await?;
    let Ok(clip) = serde_json::from_value::<Rect>(bounds) else {
        return Ok(None);
    };
    let filename = format!("{index:02}_focus.png");
    let out = save_dir.join(&filename);
    page.screenshot(&out, false, Some(clip)).await?;
    redact_viewport(page, cfg, &out).await;
    Ok(Some(filename))
}

/// Redaction pass: resolve configured selectors to bounding rects in the
/// live page, then paint opaque rectangles over those regions in the saved
/// image. Failures are logged and never fail the capture.
async fn redact_viewport(page: &dyn Page, cfg: &CaptureConfig, image_path: &Path) {
    if !cfg.redact.enabled || cfg.redact.selectors.is_empty() {
        return;
    }
    let regions = match page
        .evaluate(
            REDACTION_REGIONS_SCRIPT,
            Some(serde_json::json!(cfg.redact.selectors)),
        )
        .await
    {
        Ok(value) => serde_json::from_value::<Vec<Rect>>(value).unwrap_or_default(),
        Err(err) => {
            tracing::debug!(error = %err, "redaction region query failed");
            return;
        }
    };
    if regions.is_empty() {
        return;
    }
    if let Err(err) = paint_redactions(image_path, &regions) {
        tracing::warn!(error = %err, path = %image_path.display(), "redaction failed");
    }
}

pub fn paint_redactions(image_path: &Path, regions: &[Rect]) -> Result<()> {
    let mut img = image::open(image_path)
        .context("Failed to open screenshot for redaction")?
        .into_rgba8();
    let (width, height) = img.dimensions();
    for region in regions {
        let x0 = region.x.max(0.0) as u32;
        let y0 = region.y.max(0.0) as u32;
        let x1 = ((region.x + region.width).max(0.0) as u32).min(width);
        let y1 = ((region.y + region.height).max(0.0) as u32).min(height);
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, image::Rgba([0, 0, 0, 255]));
            }
        }
    }
    img.save(image_path).context("Failed to write redacted screenshot")
}
