use colored::Colorize;
use rcs_fast_import as rfi;
use std::error::Error;
use std::process;

fn main() {
    let invocation = match rfi::opts::parse_args() {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            process::exit(1);
        }
    };
    let opts = match invocation {
        rfi::opts::Invocation::Version => {
            println!("rcs-fast-import {}", rfi::opts::VERSION);
            return;
        }
        rfi::opts::Invocation::Usage => {
            print!("{}", rfi::opts::usage());
            return;
        }
        rfi::opts::Invocation::Run(opts) => opts,
    };
    if let Err(err) = rfi::run(&opts) {
        eprintln!("{} {err}", "error:".red().bold());
        let mut source = err.source();
        while let Some(cause) = source {
            eprintln!("Caused by: {cause}");
            source = cause.source();
        }
        process::exit(1);
    }
}
