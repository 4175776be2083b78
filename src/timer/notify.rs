// Terminal notifications and sound alerts for attention events
//
// Emits terminal escape codes (BEL, OSC 9, OSC 777, OSC 99) and plays
// system sounds when a session completes or needs the user's attention.
// The event pump calls these through the `Notifier` trait so tests can
// substitute a recording implementation.

use std::io::{self, Write};
use std::process::Command;
use std::time::{Duration, Instant};

/// Minimum time between notifications for the same client
const DEBOUNCE_DURATION: Duration = Duration::from_secs(5);

/// What kind of attention the user's session needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Planned duration reached; celebrate
    Completed,
    /// No activity past the idle threshold; nudge
    Idle,
    /// The machine slept and the session was paused
    Sleep,
}

/// Delivery seam between the event pump and the host's notification
/// mechanisms
pub trait Notifier: Send + Sync {
    fn session_completed(&self, client_id: &str, actual_duration_secs: u64);
    fn idle_detected(&self, client_id: &str);
    fn sleep_detected(&self, client_id: &str);
}

/// Tracks the last notification time for debouncing
#[derive(Default)]
pub struct NotificationDebouncer {
    last_notify: Option<Instant>,
}

impl NotificationDebouncer {
    pub fn new() -> Self {
        Self { last_notify: None }
    }

    /// Returns true if enough time has passed since the last notification
    pub fn should_notify(&mut self) -> bool {
        let now = Instant::now();
        match self.last_notify {
            Some(last) if now.duration_since(last) < DEBOUNCE_DURATION => false,
            _ => {
                self.last_notify = Some(now);
                true
            }
        }
    }

    /// Resets the debouncer (e.g., when the session ends)
    pub fn reset(&mut self) {
        self.last_notify = None;
    }
}

/// Notifier that writes terminal escape sequences and plays system sounds
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn session_completed(&self, client_id: &str, actual_duration_secs: u64) {
        let minutes = actual_duration_secs / 60;
        notify(
            client_id,
            AlertKind::Completed,
            &format!("Session complete after {} min. Nice work.", minutes),
        );
    }

    fn idle_detected(&self, client_id: &str) {
        notify(
            client_id,
            AlertKind::Idle,
            "Still there? Your timer is running but nothing has happened for a while.",
        );
    }

    fn sleep_detected(&self, client_id: &str) {
        notify(
            client_id,
            AlertKind::Sleep,
            "Your machine slept; the timer was paused. Resume when ready.",
        );
    }
}

/// Sends a notification for an attention event.
///
/// Combines terminal escape codes and sound playback. Callers are expected
/// to have passed a debounce check first.
pub fn notify(client_id: &str, kind: AlertKind, message: &str) {
    let title = format!("tempo: {}", client_id);
    emit_terminal_notifications(&title, &truncate_preview(message, 80));
    play_alert_sound(kind);
}

/// Emits terminal notification escape codes to stdout.
///
/// Writes multiple sequences to cover common terminal emulators:
/// - BEL (`\x07`) - Universal terminal bell
/// - OSC 9 (iTerm2) - Desktop notification
/// - OSC 777 (Konsole/VTE/Gnome Terminal) - Desktop notification
/// - OSC 99 (kitty) - Desktop notification
pub fn emit_terminal_notifications(title: &str, message: &str) {
    let mut stdout = io::stdout();

    // BEL - universal terminal bell
    let _ = stdout.write_all(b"\x07");

    // OSC 9 - iTerm2 notification
    // Format: ESC ] 9 ; message BEL
    let osc9 = format!("\x1b]9;{}\x07", escape_osc(message));
    let _ = stdout.write_all(osc9.as_bytes());

    // OSC 777 - Konsole/VTE/Gnome Terminal
    // Format: ESC ] 777 ; notify ; title ; message BEL
    let osc777 = format!(
        "\x1b]777;notify;{};{}\x07",
        escape_osc(title),
        escape_osc(message)
    );
    let _ = stdout.write_all(osc777.as_bytes());

    // OSC 99 - kitty notification
    // Format: ESC ] 99 ; i=1:d=0:p=body ; message ST
    // i=1: unique id, d=0: no sound (we play our own), p=body: payload type
    let osc99 = format!(
        "\x1b]99;i=1:d=0:p=title;{}\x1b\\\x1b]99;i=1:d=0:p=body;{}\x1b\\",
        escape_osc(title),
        escape_osc(message)
    );
    let _ = stdout.write_all(osc99.as_bytes());

    let _ = stdout.flush();
}

/// Escapes special characters for OSC sequences
fn escape_osc(s: &str) -> String {
    // OSC sequences are terminated by BEL or ST, so strip those
    s.replace('\x07', "")
        .replace('\x1b', "")
        .replace('\n', " ")
        .replace('\r', "")
}

/// Plays a system sound appropriate for the alert kind.
///
/// On macOS, uses `afplay` with system sounds.
/// On Linux, uses `paplay` with PulseAudio.
/// Spawns the player in a detached process to avoid blocking.
pub fn play_alert_sound(kind: AlertKind) {
    #[cfg(target_os = "macos")]
    play_macos_sound(kind);

    #[cfg(target_os = "linux")]
    play_linux_sound(kind);
}

#[cfg(target_os = "macos")]
fn play_macos_sound(kind: AlertKind) {
    let sound_file = match kind {
        AlertKind::Completed => "/System/Library/Sounds/Glass.aiff",
        AlertKind::Idle => "/System/Library/Sounds/Funk.aiff",
        AlertKind::Sleep => "/System/Library/Sounds/Basso.aiff",
    };

    // Spawn afplay in background, ignoring errors
    let _ = Command::new("afplay")
        .arg(sound_file)
        .arg("-v")
        .arg("0.5") // 50% volume to not be jarring
        .spawn();
}

#[cfg(target_os = "linux")]
fn play_linux_sound(kind: AlertKind) {
    let sound_candidates = match kind {
        AlertKind::Completed => vec![
            "/usr/share/sounds/freedesktop/stereo/complete.oga",
            "/usr/share/sounds/gnome/default/alerts/glass.ogg",
        ],
        AlertKind::Idle => vec![
            "/usr/share/sounds/freedesktop/stereo/message-new-instant.oga",
            "/usr/share/sounds/gnome/default/alerts/drip.ogg",
        ],
        AlertKind::Sleep => vec![
            "/usr/share/sounds/freedesktop/stereo/dialog-error.oga",
            "/usr/share/sounds/gnome/default/alerts/bark.ogg",
        ],
    };

    // Find first existing sound file
    let sound_file = sound_candidates
        .into_iter()
        .find(|path| std::path::Path::new(path).exists());

    if let Some(path) = sound_file {
        // Try paplay (PulseAudio) first, then aplay (ALSA)
        if Command::new("paplay").arg(path).spawn().is_err() {
            let _ = Command::new("aplay").arg("-q").arg(path).spawn();
        }
    }
}

/// Truncates preview text for notifications
fn truncate_preview(preview: &str, max_len: usize) -> String {
    // Take first line only for notification
    let first_line = preview.lines().next().unwrap_or(preview);
    if first_line.len() <= max_len {
        first_line.to_string()
    } else {
        format!("{}...", &first_line[..max_len - 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debouncer_allows_first_notification() {
        let mut debouncer = NotificationDebouncer::new();
        assert!(debouncer.should_notify());
    }

    #[test]
    fn debouncer_blocks_rapid_notifications() {
        let mut debouncer = NotificationDebouncer::new();
        assert!(debouncer.should_notify());
        assert!(!debouncer.should_notify());
        assert!(!debouncer.should_notify());
    }

    #[test]
    fn debouncer_reset_allows_immediate_notification() {
        let mut debouncer = NotificationDebouncer::new();
        assert!(debouncer.should_notify());
        debouncer.reset();
        assert!(debouncer.should_notify());
    }

    #[test]
    fn escape_osc_removes_control_chars() {
        assert_eq!(escape_osc("hello\x07world"), "helloworld");
        assert_eq!(escape_osc("test\x1b[0m"), "test[0m");
        assert_eq!(escape_osc("line1\nline2"), "line1 line2");
    }

    #[test]
    fn truncate_preview_respects_max_length() {
        let long_text = "a".repeat(100);
        let truncated = truncate_preview(&long_text, 80);
        assert!(truncated.len() <= 80);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncate_preview_takes_first_line() {
        let multiline = "first line\nsecond line\nthird line";
        assert_eq!(truncate_preview(multiline, 80), "first line");
    }
}
