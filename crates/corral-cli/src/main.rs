//! corral - run one untrusted command under cgroup and namespace limits.
//!
//! Exit codes: 0 for a completed supervision (or the child's exit code under
//! `--pass-exitcode`), 1..9 for configuration / environment / cgroup errors,
//! 10..20 when a launch stage fails. The resource report goes to fd 3.

use std::process;

use corral_sandbox::config::Config;
use corral_sandbox::{launch, supervise, validate, Invoker};

mod options;

use options::{Action, Parsed};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprint!("{}", options::help_text());
        process::exit(0);
    }

    let Parsed { action, debug, status } = match options::parse(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("{err:#}");
            eprintln!("Use --help for information.");
            process::exit(1);
        }
    };
    init_logging(debug, status);

    let code = match action {
        Action::Help => {
            eprint!("{}", options::help_text());
            0
        }
        Action::HelpSyscalls => {
            eprint!("{}", options::help_syscalls_text());
            0
        }
        Action::Version => {
            print!("{}", options::version_text());
            0
        }
        Action::Run(cfg) => run(*cfg),
    };
    process::exit(code);
}

fn run(cfg: Config) -> i32 {
    if let Err(messages) = validate(&cfg, Invoker::current()) {
        for message in &messages {
            eprintln!("{message}\n");
        }
        eprintln!("Please fix these errors and try again.");
        return 1;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "corral starting"
    );

    match launch(&cfg) {
        Ok(session) => supervise(session, &cfg),
        Err(err) => {
            eprintln!("corral: {err}");
            err.exit_code()
        }
    }
}

fn init_logging(debug: bool, status: bool) {
    let default = if status {
        "corral=trace,corral_sandbox=trace"
    } else if debug {
        "corral=debug,corral_sandbox=debug"
    } else {
        "corral=warn,corral_sandbox=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
