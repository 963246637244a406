use std::env;
use std::io;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// Leave masters locked, no working files.
    None,
    /// Working files checked out locked (check-ins already hold the
    /// locks, so nothing further to do).
    Locked,
    /// Unlock masters and check out unlocked working files.
    Unlocked,
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Progress/tracing level; each step unlocks another layer.
    pub verbose: u8,
    /// Plain mode: commit comments are the raw payload, no RFC-822
    /// envelope.
    pub plain: bool,
    pub checkout: CheckoutMode,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            verbose: 0,
            plain: false,
            checkout: CheckoutMode::None,
        }
    }
}

/// What the command line asked for.
#[derive(Debug)]
pub enum Invocation {
    Run(Options),
    Version,
    Usage,
}

pub fn parse_args() -> io::Result<Invocation> {
    parse_from(env::args().skip(1))
}

pub fn parse_from<I>(args: I) -> io::Result<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let mut opts = Options::default();
    for arg in args {
        let flags = arg.strip_prefix('-').ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unexpected operand {:?} (the stream is read from stdin)", arg),
            )
        })?;
        if flags.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty option; try -?",
            ));
        }
        for flag in flags.chars() {
            match flag {
                'v' => opts.verbose = opts.verbose.saturating_add(1),
                'p' => opts.plain = true,
                'l' => opts.checkout = CheckoutMode::Locked,
                'u' => opts.checkout = CheckoutMode::Unlocked,
                'V' => return Ok(Invocation::Version),
                '?' => return Ok(Invocation::Usage),
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("unknown option -{}; try -?", other),
                    ));
                }
            }
        }
    }
    Ok(Invocation::Run(opts))
}

pub fn usage() -> String {
    [
        "usage: rcs-fast-import [-v] [-p] [-l | -u] [-V] [-?] < stream",
        "  -v    increase verbosity (repeatable)",
        "  -p    plain mode: no RFC-822 envelope around commit comments",
        "  -l    check out working files locked after import",
        "  -u    check out working files unlocked after import",
        "  -V    print version and exit",
        "  -?    print this help and exit",
        "",
    ]
    .join("\n")
}
