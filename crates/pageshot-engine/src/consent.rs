//! Consent overlay dismissal.
//!
//! Cookie and consent banners sit on top of most public pages and ruin
//! screenshots. This module runs a fixed chain of heuristics against the
//! live page: known CMP banner containers first, then a page-wide sweep of
//! accept-style controls, then consent iframes, and finally one delayed
//! retry for banners that mount late. The first strategy that lands a click
//! wins. Everything here is best effort; failures are logged and never
//! propagate to the capture.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::driver::{ClickMethod, ElementHit, PageSession};

/// Containers injected by the widespread consent-management platforms.
const BANNER_SELECTORS: &[&str] = &[
    "#onetrust-banner-sdk",
    "#CybotCookiebotDialog",
    "#didomi-host",
    "#usercentrics-root",
    "#qc-cmp2-container",
    "#sp_message_container",
    ".cc-window",
    ".cookie-banner",
    "[class*='cookie-consent']",
    "[id*='cookie-banner']",
];

/// Accept buttons with well-known stable selectors.
const CONTROL_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    "#didomi-notice-agree-button",
    "button[data-testid='uc-accept-all-button']",
    ".fc-cta-consent",
    ".cc-allow",
    ".cc-dismiss",
    "button#accept-cookies",
];

/// Lowercased label fragments that mark an accept/dismiss control.
const ACCEPT_NEEDLES: &[&str] = &[
    "accept all",
    "accept cookies",
    "accept",
    "agree",
    "i agree",
    "allow all",
    "allow cookies",
    "got it",
    "ok",
    "okay",
    "dismiss",
    "i understand",
    "alle akzeptieren",
    "akzeptieren",
    "zustimmen",
    "einverstanden",
    "tout accepter",
    "j'accepte",
    "aceptar todo",
    "aceptar",
    "accetta tutti",
    "accetta",
];

/// Substrings identifying iframes that host consent dialogs.
const FRAME_HINTS: &[&str] = &["consent", "cookie", "cmp", "privacy", "gdpr", "sp_message"];

const PROBE_JS: &str = r#"/* consent-probe:__MODE__ */
(() => {
  const banners = __BANNERS__;
  const needles = __NEEDLES__;
  const controls = __CONTROLS__;
  const frameHints = __FRAME_HINTS__;
  const mode = "__MODE__";
  const visible = (el) => {
    const rect = el.getBoundingClientRect();
    if (rect.width < 4 || rect.height < 4) return false;
    const style = window.getComputedStyle(el);
    return style.display !== 'none' && style.visibility !== 'hidden' && style.opacity !== '0';
  };
  const cssPath = (el) => {
    const parts = [];
    while (el && el.nodeType === 1 && parts.length < 6) {
      let part = el.tagName.toLowerCase();
      if (el.id) { parts.unshift(part + '#' + CSS.escape(el.id)); break; }
      const parent = el.parentElement;
      if (parent) {
        const siblings = Array.from(parent.children).filter(c => c.tagName === el.tagName);
        if (siblings.length > 1) part += ':nth-of-type(' + (siblings.indexOf(el) + 1) + ')';
      }
      parts.unshift(part);
      el = parent;
    }
    return parts.join(' > ');
  };
  const label = (el) => ((el.innerText || el.value || el.getAttribute('aria-label') || '') + '')
    .trim().replace(/\s+/g, ' ').slice(0, 80);
  const collect = (root, offsetX, offsetY, frameCss) => {
    const seen = new Set();
    const out = [];
    const push = (el) => {
      if (seen.has(el) || !visible(el)) return;
      seen.add(el);
      const rect = el.getBoundingClientRect();
      out.push({
        css: cssPath(el),
        frame: frameCss,
        cx: offsetX + rect.x + rect.width / 2,
        cy: offsetY + rect.y + rect.height / 2,
        label: label(el),
      });
    };
    for (const sel of controls) {
      for (const el of root.querySelectorAll(sel)) push(el);
    }
    const clickables = root.querySelectorAll(
      "button, [role='button'], a, input[type='button'], input[type='submit']");
    for (const el of clickables) {
      const text = label(el).toLowerCase();
      if (!text || text.length > 40) continue;
      if (needles.some(n => text === n || text.startsWith(n + ' '))) push(el);
    }
    return out;
  };
  let hits = [];
  if (mode === 'banner') {
    for (const sel of banners) {
      const banner = document.querySelector(sel);
      if (banner && visible(banner)) {
        hits = collect(banner, 0, 0, null);
        if (hits.length) break;
      }
    }
  } else if (mode === 'frames') {
    for (const frame of document.querySelectorAll('iframe')) {
      const ident = ((frame.id || '') + ' ' + (frame.name || '') + ' '
        + (frame.src || '') + ' ' + (frame.title || '')).toLowerCase();
      if (!frameHints.some(h => ident.includes(h))) continue;
      let doc = null;
      try { doc = frame.contentDocument; } catch (e) { continue; }
      if (!doc) continue;
      const rect = frame.getBoundingClientRect();
      hits = hits.concat(collect(doc, rect.x, rect.y, cssPath(frame)));
    }
  } else {
    hits = collect(document, 0, 0, null);
  }
  return JSON.stringify(hits.slice(0, 8));
})()"#;

const VISIBILITY_JS: &str = r#"/* consent-visibility */
(() => {
  const el = document.querySelector(__CSS__);
  if (!el) return false;
  const rect = el.getBoundingClientRect();
  const style = window.getComputedStyle(el);
  return rect.width > 0 && rect.height > 0
    && style.display !== 'none' && style.visibility !== 'hidden';
})()"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeMode {
    Banner,
    Page,
    Frames,
}

impl ProbeMode {
    fn as_str(&self) -> &'static str {
        match self {
            ProbeMode::Banner => "banner",
            ProbeMode::Page => "page",
            ProbeMode::Frames => "frames",
        }
    }
}

struct Strategy {
    name: &'static str,
    mode: ProbeMode,
    delay: Duration,
}

const STRATEGIES: [Strategy; 4] = [
    Strategy {
        name: "scoped-banner",
        mode: ProbeMode::Banner,
        delay: Duration::ZERO,
    },
    Strategy {
        name: "direct-controls",
        mode: ProbeMode::Page,
        delay: Duration::ZERO,
    },
    Strategy {
        name: "consent-frames",
        mode: ProbeMode::Frames,
        delay: Duration::ZERO,
    },
    // Banners mounted by late scripts get one more page-wide sweep.
    Strategy {
        name: "delayed-retry",
        mode: ProbeMode::Page,
        delay: Duration::from_millis(400),
    },
];

/// What the dismissal pass achieved, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentOutcome {
    pub dismissed: bool,
    pub strategy: Option<&'static str>,
    pub clicks_attempted: usize,
}

/// Run the dismissal chain against the page, stopping at the first strategy
/// that lands a click or when the budget runs out. Never fails.
pub async fn dismiss_overlays(page: &dyn PageSession, budget: Duration) -> ConsentOutcome {
    let deadline = Instant::now() + budget;
    let mut clicks_attempted = 0;

    for strategy in &STRATEGIES {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if !strategy.delay.is_zero() {
            sleep(strategy.delay.min(deadline - now)).await;
        }

        let hits = probe(page, strategy.mode).await;
        for hit in hits.iter().take(3) {
            if Instant::now() >= deadline {
                break;
            }
            clicks_attempted += 1;
            if try_click(page, hit).await {
                info!(
                    strategy = strategy.name,
                    target = %hit.label,
                    "dismissed consent overlay"
                );
                return ConsentOutcome {
                    dismissed: true,
                    strategy: Some(strategy.name),
                    clicks_attempted,
                };
            }
        }
    }

    debug!(clicks_attempted, "no consent overlay dismissed");
    ConsentOutcome {
        dismissed: false,
        strategy: None,
        clicks_attempted,
    }
}

/// Locate candidate controls for the given scope. Probe failures yield an
/// empty candidate list.
async fn probe(page: &dyn PageSession, mode: ProbeMode) -> Vec<ElementHit> {
    let js = build_probe_js(mode);
    match page.evaluate(&js).await {
        Ok(value) => parse_hits(value),
        Err(err) => {
            debug!(mode = mode.as_str(), error = %err, "consent probe failed");
            Vec::new()
        }
    }
}

/// Click the hit, escalating through delivery methods until the overlay
/// actually goes away. Returns true if any click landed.
async fn try_click(page: &dyn PageSession, hit: &ElementHit) -> bool {
    let mut clicked = false;
    for method in ClickMethod::ALL {
        // Elements inside iframes cannot be resolved from the main frame.
        if method == ClickMethod::Element && hit.frame_css.is_some() {
            continue;
        }
        match page.click(hit, method).await {
            Ok(()) => {
                clicked = true;
                if wait_dismissed(page, hit, Duration::from_millis(600)).await {
                    return true;
                }
                // Click landed but the overlay persists; escalate.
            }
            Err(err) => {
                debug!(?method, target = %hit.css, error = %err, "consent click failed");
            }
        }
    }
    clicked
}

/// Poll until the clicked element disappears. Elements inside frames are
/// assumed gone once clicked.
async fn wait_dismissed(page: &dyn PageSession, hit: &ElementHit, timeout: Duration) -> bool {
    if hit.frame_css.is_some() {
        return true;
    }
    let js = VISIBILITY_JS.replace("__CSS__", &json_value(&hit.css));
    let deadline = Instant::now() + timeout;
    loop {
        match page.evaluate(&js).await {
            Ok(Value::Bool(false)) => return true,
            // A click that triggered navigation also counts as dismissed.
            Err(_) => return true,
            Ok(_) => {}
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(100)).await;
    }
}

fn build_probe_js(mode: ProbeMode) -> String {
    PROBE_JS
        .replace("__BANNERS__", &json_list(BANNER_SELECTORS))
        .replace("__NEEDLES__", &json_list(ACCEPT_NEEDLES))
        .replace("__CONTROLS__", &json_list(CONTROL_SELECTORS))
        .replace("__FRAME_HINTS__", &json_list(FRAME_HINTS))
        .replace("__MODE__", mode.as_str())
}

fn json_list(items: &[&str]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn json_value(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

/// Decode the probe's JSON payload into hits. Anything malformed is
/// silently skipped.
fn parse_hits(value: Value) -> Vec<ElementHit> {
    let parsed;
    let items = match &value {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).unwrap_or(Value::Null);
            parsed.as_array()
        }
        _ => value.as_array(),
    };
    let Some(items) = items else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            Some(ElementHit {
                css: item.get("css")?.as_str()?.to_string(),
                frame_css: item
                    .get("frame")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                x: item.get("cx")?.as_f64()?,
                y: item.get("cy")?.as_f64()?,
                label: item
                    .get("label")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .collect()
}
