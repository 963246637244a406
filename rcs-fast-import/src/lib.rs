pub mod assign;
pub mod event;
pub mod opts;
pub mod parser;
pub mod pathutil;
pub mod progress;
pub mod rcs;
pub mod replay;
pub mod revision;
pub mod scratch;
pub mod stream;

pub use opts::Options;

use std::env;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::rcs::RcsToolkit;
use crate::replay::Replayer;
use crate::scratch::{ScratchDir, WorkDir};

/// Reads a fast-import stream from stdin and replays it into a tree of
/// RCS masters rooted at the invocation directory. All intermediate
/// state lives in per-process scratch and working directories that are
/// torn down on every exit path; the destination only changes in the
/// final promotion step.
pub fn run(opts: &Options) -> io::Result<()> {
    progress::set_verbosity(opts.verbose);
    let interrupt = install_interrupt_flag()?;
    let invocation_dir = env::current_dir()?;
    let scratch = ScratchDir::create(&invocation_dir)?;
    let stdin = io::stdin();
    let repo = parser::parse(stdin.lock(), scratch, &interrupt)?;
    let work = WorkDir::create(&invocation_dir)?;
    let mut vcs = RcsToolkit::new(work.path().to_path_buf());
    let mut player = Replayer::new(
        &repo,
        opts,
        &mut vcs,
        work.path().to_path_buf(),
        &interrupt,
    );
    player.replay()?;
    player.finish()?;
    work.promote(&invocation_dir)?;
    Ok(())
}

/// SIGINT/SIGTERM set a flag the parser and replay engine poll at
/// their I/O boundaries; the scratch and working directories then tear
/// down as the error unwinds.
fn install_interrupt_flag() -> io::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    {
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))?;
    }
    Ok(flag)
}
