use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::pathutil::{master_path, path_from_bytes};
use crate::progress;
use crate::replay::VcsOps;
use crate::revision::RevId;

/// Drives the external RCS toolchain (`ci`, `co`, `rcs`). Commands run
/// with the temporary working tree as their current directory so the
/// tools find each file's `RCS/` subdirectory on their own.
pub struct RcsToolkit {
    root: PathBuf,
}

impl RcsToolkit {
    pub fn new(root: PathBuf) -> Self {
        RcsToolkit { root }
    }

    fn run_tool(&self, program: &str, args: Vec<OsString>) -> io::Result<()> {
        if progress::enabled(progress::CMDS) {
            progress::note(&echo_command(program, &args));
        }
        let mut cmd = Command::new(program);
        cmd.args(&args).current_dir(&self.root);
        if !progress::enabled(progress::CMDS) {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let status = cmd.status().map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("failed to run {}: {}", program, e),
            )
        })?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                match exit_detail(&status) {
                    Some(detail) => {
                        format!("{} failed ({}): {}", program, detail, echo_command(program, &args))
                    }
                    None => format!("{} failed: {}", program, echo_command(program, &args)),
                },
            ));
        }
        Ok(())
    }
}

impl VcsOps for RcsToolkit {
    fn checkin(
        &mut self,
        file: &[u8],
        rev: &RevId,
        date: &str,
        comment: &[u8],
        state: Option<&str>,
    ) -> io::Result<()> {
        let mut args: Vec<OsString> = vec![
            "-q".into(),
            "-f".into(),
            flag_arg("-l", rev.to_string().as_bytes()),
            flag_arg("-d", date.as_bytes()),
            flag_arg("-m", comment),
        ];
        if let Some(state) = state {
            args.push(flag_arg("-s", state.as_bytes()));
        }
        // A brand-new master would prompt for its description.
        if !master_path(&self.root, file).exists() {
            args.push("-t-".into());
        }
        args.push(path_from_bytes(file).into_os_string());
        self.run_tool("ci", args)
    }

    fn checkout(&mut self, file: &[u8], rev: Option<&RevId>, locked: bool) -> io::Result<()> {
        let mut args: Vec<OsString> = vec!["-q".into(), "-f".into()];
        if locked {
            args.push("-l".into());
        }
        if let Some(rev) = rev {
            args.push(flag_arg("-r", rev.to_string().as_bytes()));
        }
        args.push(path_from_bytes(file).into_os_string());
        self.run_tool("co", args)
    }

    fn lock(&mut self, file: &[u8], rev: &RevId) -> io::Result<()> {
        let args = vec![
            "-q".into(),
            flag_arg("-l", rev.to_string().as_bytes()),
            path_from_bytes(file).into_os_string(),
        ];
        self.run_tool("rcs", args)
    }

    fn unlock(&mut self, file: &[u8]) -> io::Result<()> {
        let args = vec![
            "-q".into(),
            "-u".into(),
            path_from_bytes(file).into_os_string(),
        ];
        self.run_tool("rcs", args)
    }

    fn symbol(&mut self, file: &[u8], name: &[u8], rev: &str) -> io::Result<()> {
        let mut value = name.to_vec();
        value.push(b':');
        value.extend_from_slice(rev.as_bytes());
        let args = vec![
            "-q".into(),
            flag_arg("-N", &value),
            path_from_bytes(file).into_os_string(),
        ];
        self.run_tool("rcs", args)
    }
}

/// Joins a flag with a possibly non-UTF-8 value into one argv entry.
#[cfg(unix)]
fn flag_arg(flag: &str, value: &[u8]) -> OsString {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    let mut bytes = flag.as_bytes().to_vec();
    bytes.extend_from_slice(value);
    OsStr::from_bytes(&bytes).to_os_string()
}

#[cfg(not(unix))]
fn flag_arg(flag: &str, value: &[u8]) -> OsString {
    let mut s = flag.to_string();
    s.push_str(&String::from_utf8_lossy(value));
    OsString::from(s)
}

/// Shell-quoted command line for the `-vvv` echo.
fn echo_command(program: &str, args: &[OsString]) -> String {
    let mut parts = vec![String::from(program)];
    for arg in args {
        let text = arg.to_string_lossy();
        parts.push(
            shlex::try_quote(&text)
                .map(|q| q.into_owned())
                .unwrap_or_else(|_| text.into_owned()),
        );
    }
    parts.join(" ")
}

#[cfg(unix)]
fn exit_detail(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => Some(format!("exit status {}", code)),
        (None, Some(sig)) => Some(format!("killed by signal {}", sig)),
        _ => None,
    }
}

#[cfg(not(unix))]
fn exit_detail(status: &std::process::ExitStatus) -> Option<String> {
    status.code().map(|code| format!("exit status {}", code))
}
