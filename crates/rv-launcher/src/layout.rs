//! Viewer window placement

use tokio::process::Command;

use rv_core::Session;

/// Columns and rows of the default grid
const GRID: (u32, u32) = (2, 2);

/// Size and position of one viewer window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSlot {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
}

/// Window slots handed out to viewers in launch order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowLayout {
    slots: Vec<WindowSlot>,
}

impl WindowLayout {
    /// Lay windows out on a 2x2 grid over the screen.
    ///
    /// `window_size` overrides the cell size and `positions` override the
    /// cell origins, cyclically. Without a screen size the layout is empty.
    pub fn compute(
        screen: Option<(u32, u32)>,
        window_size: Option<[u32; 2]>,
        positions: Option<&[[i32; 2]]>,
    ) -> Self {
        let Some((screen_w, screen_h)) = screen else {
            return Self::default();
        };
        let (cols, rows) = GRID;

        let (width, height) = match window_size {
            Some([w, h]) => (w, h),
            None => (
                (f64::from(screen_w) / f64::from(cols)).round() as u32,
                (f64::from(screen_h) / f64::from(rows)).round() as u32,
            ),
        };

        let mut slots = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                let (x, y) = match positions.filter(|p| !p.is_empty()) {
                    Some(p) => {
                        let [x, y] = p[slots.len() % p.len()];
                        (x, y)
                    }
                    None => (
                        (f64::from(col * screen_w) / f64::from(cols)).round() as i32,
                        (f64::from(row * screen_h) / f64::from(rows)).round() as i32,
                    ),
                };
                slots.push(WindowSlot { width, height, x, y });
            }
        }

        tracing::debug!("geometry: {:?}", slots);
        Self { slots }
    }

    /// Slot for the `index`-th window, wrapping around
    pub fn slot(&self, index: usize) -> Option<WindowSlot> {
        if self.slots.is_empty() {
            None
        } else {
            Some(self.slots[index % self.slots.len()])
        }
    }

    /// `+x+y` hint for the `index`-th viewer.
    ///
    /// Only Linux viewers honour the hint.
    pub fn geometry_hint(&self, index: usize) -> Option<String> {
        if cfg!(target_os = "linux") {
            self.slot(index).map(|s| format!("+{}+{}", s.x, s.y))
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Screen size reported by `xdpyinfo`
pub async fn detect_screen_size() -> Option<(u32, u32)> {
    if which::which("xdpyinfo").is_err() {
        tracing::debug!("Could not calc window geometry");
        return None;
    }

    let output = Command::new("xdpyinfo").kill_on_drop(true).output().await.ok()?;
    let size = parse_dimensions(&String::from_utf8_lossy(&output.stdout));
    match size {
        Some((w, h)) => tracing::debug!("Screen size: {}x{}", w, h),
        None => tracing::debug!("Could not calc window geometry"),
    }
    size
}

/// Pull `WxH` out of the `dimensions:` line
fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let line = text.lines().find(|l| l.trim_start().starts_with("dimensions:"))?;
    let dims = line.split_whitespace().nth(1)?;
    let (w, h) = dims.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

/// Window ids from `wmctrl -l` whose title mentions `needle`
fn find_window<'a>(listing: &'a str, needle: &str) -> Option<&'a str> {
    listing
        .lines()
        .filter(|line| line.contains(needle))
        .last()
        .and_then(|line| line.split_whitespace().next())
}

/// Move each session's viewer window to its slot with `wmctrl`
pub async fn reposition_windows(
    sessions: &[Session],
    layout: &WindowLayout,
) -> std::io::Result<()> {
    tracing::info!("Positioning VNC windows...");

    let output = Command::new("wmctrl").arg("-l").kill_on_drop(true).output().await?;
    let listing = String::from_utf8_lossy(&output.stdout);
    for line in listing.lines() {
        tracing::debug!("wmctrl line: {}", line);
    }

    for (i, session) in sessions.iter().enumerate() {
        let Some(win_id) = find_window(&listing, &session.desktop) else {
            tracing::info!("Could not find window process for VNC session '{}'", session.desktop);
            continue;
        };
        let Some(slot) = layout.slot(i) else {
            continue;
        };

        let placement = format!("0,{},{},-1,-1", slot.x, slot.y);
        tracing::debug!(
            "Positioning '{}' with command: wmctrl -i -r {} -e {}",
            session.desktop,
            win_id,
            placement
        );
        Command::new("wmctrl")
            .args(["-i", "-r", win_id, "-e", placement.as_str()])
            .kill_on_drop(true)
            .status()
            .await?;
    }
    Ok(())
}
