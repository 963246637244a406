use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use colored::Colorize;

// Verbosity thresholds, each -v unlocking the next.
pub const BATON: u8 = 1;
pub const OPS: u8 = 2;
pub const CMDS: u8 = 3;
pub const SHUFFLE: u8 = 4;
pub const DELETES: u8 = 5;

static VERBOSITY: AtomicU8 = AtomicU8::new(0);

/// Set once at startup; process-wide thereafter.
pub fn set_verbosity(level: u8) {
    VERBOSITY.store(level, Ordering::Relaxed);
}

pub fn verbosity() -> u8 {
    VERBOSITY.load(Ordering::Relaxed)
}

pub fn enabled(level: u8) -> bool {
    verbosity() >= level
}

/// Progress note on stdout. Diagnostics never go here.
pub fn note(msg: &str) {
    println!("{}", msg);
}

pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

/// Twirling progress indicator on stdout for the lowest verbosity level,
/// matching the cadence of one tick per replayed event.
pub struct Baton {
    ticks: usize,
    active: bool,
}

const GLYPHS: [char; 4] = ['|', '/', '-', '\\'];

impl Baton {
    pub fn start(label: &str) -> Self {
        let active = enabled(BATON);
        if active {
            print!("{}... ", label);
            let _ = io::stdout().flush();
        }
        Baton { ticks: 0, active }
    }

    pub fn twirl(&mut self) {
        if !self.active {
            return;
        }
        print!("{}\u{8}", GLYPHS[self.ticks % GLYPHS.len()]);
        self.ticks += 1;
        let _ = io::stdout().flush();
    }

    pub fn end(&mut self, msg: &str) {
        if self.active {
            println!("{}", msg);
            self.active = false;
        }
    }
}
