//! Declarative option table.
//!
//! Options are processed in a single left-to-right pass: each flag names an
//! arity and a setter, repeatable flags append, and the first token that is
//! not an option (or a bare `--`) starts the command line. Order matters and
//! is preserved, because bind mounts rewrite the paths of the operands that
//! follow them.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use corral_sandbox::config::{clamp_memory_limit, Config, RlimitKey, SyscallAction};
use corral_sandbox::Subsys;

/// What the command line asked for.
#[derive(Debug)]
pub enum Action {
    Run(Box<Config>),
    Help,
    HelpSyscalls,
    Version,
}

/// Parse result plus the flags that only affect logging.
#[derive(Debug)]
pub struct Parsed {
    pub action: Action,
    pub debug: bool,
    pub status: bool,
}

struct Opt {
    name: &'static str,
    nargs: usize,
    apply: fn(&mut Config, &[String]) -> Result<()>,
}

const TABLE: &[Opt] = &[
    Opt { name: "max-cpu-time", nargs: 1, apply: |cfg, v| {
        cfg.cpu_time_limit = parse_seconds(&v[0])?;
        Ok(())
    }},
    Opt { name: "max-real-time", nargs: 1, apply: |cfg, v| {
        cfg.real_time_limit = parse_seconds(&v[0])?;
        Ok(())
    }},
    Opt { name: "max-memory", nargs: 1, apply: |cfg, v| {
        let (limit, raised) = clamp_memory_limit(parse_bytes(&v[0])?);
        if raised {
            eprintln!("corral: max-memory too small, raised to {limit}");
        }
        cfg.memory_limit = limit;
        Ok(())
    }},
    Opt { name: "max-output", nargs: 1, apply: |cfg, v| {
        let bytes = parse_bytes(&v[0])?;
        cfg.output_limit = bytes;
        cfg.rlimits.insert(RlimitKey::Fsize, bytes.max(0) as u64);
        Ok(())
    }},
    Opt { name: "max-nprocess", nargs: 1, apply: |cfg, v| {
        cfg.rlimits.insert(RlimitKey::Nproc, parse_u64(&v[0])?);
        Ok(())
    }},
    // Deprecated spelling kept for old graders.
    Opt { name: "min-nice", nargs: 1, apply: |cfg, v| {
        let nice: i64 = v[0].parse().context("bad nice value")?;
        cfg.rlimits.insert(RlimitKey::Nice, (20 - nice).max(0) as u64);
        Ok(())
    }},
    Opt { name: "max-rtprio", nargs: 1, apply: |cfg, v| {
        cfg.rlimits.insert(RlimitKey::Rtprio, parse_u64(&v[0])?);
        Ok(())
    }},
    Opt { name: "max-nfile", nargs: 1, apply: |cfg, v| {
        cfg.rlimits.insert(RlimitKey::Nofile, parse_u64(&v[0])?);
        Ok(())
    }},
    Opt { name: "max-stack", nargs: 1, apply: |cfg, v| {
        cfg.rlimits.insert(RlimitKey::Stack, parse_bytes(&v[0])?.max(0) as u64);
        Ok(())
    }},
    Opt { name: "isolate-process", nargs: 1, apply: |cfg, v| {
        cfg.isolate_process = parse_bool(&v[0])?;
        Ok(())
    }},
    Opt { name: "basic-devices", nargs: 1, apply: |cfg, v| {
        cfg.basic_devices = parse_bool(&v[0])?;
        Ok(())
    }},
    Opt { name: "remount-dev", nargs: 1, apply: |cfg, v| {
        cfg.remount_dev = parse_bool(&v[0])?;
        Ok(())
    }},
    Opt { name: "reset-env", nargs: 1, apply: |cfg, v| {
        cfg.reset_env = parse_bool(&v[0])?;
        Ok(())
    }},
    Opt { name: "network", nargs: 1, apply: |cfg, v| {
        cfg.enable_network = parse_bool(&v[0])?;
        Ok(())
    }},
    Opt { name: "pass-exitcode", nargs: 1, apply: |cfg, v| {
        cfg.pass_exitcode = parse_bool(&v[0])?;
        Ok(())
    }},
    Opt { name: "chroot", nargs: 1, apply: |cfg, v| {
        cfg.chroot_path = Some(PathBuf::from(&v[0]));
        Ok(())
    }},
    Opt { name: "chdir", nargs: 1, apply: |cfg, v| {
        cfg.chdir_path = Some(PathBuf::from(&v[0]));
        Ok(())
    }},
    Opt { name: "nice", nargs: 1, apply: |cfg, v| {
        cfg.nice = v[0].parse().context("bad nice value")?;
        Ok(())
    }},
    Opt { name: "umask", nargs: 1, apply: |cfg, v| {
        cfg.umask = parse_octal(&v[0])?;
        Ok(())
    }},
    Opt { name: "uid", nargs: 1, apply: |cfg, v| {
        cfg.uid = v[0].parse().context("bad uid")?;
        Ok(())
    }},
    Opt { name: "gid", nargs: 1, apply: |cfg, v| {
        cfg.gid = v[0].parse().context("bad gid")?;
        Ok(())
    }},
    Opt { name: "no-new-privs", nargs: 1, apply: |cfg, v| {
        cfg.no_new_privs = parse_bool(&v[0])?;
        Ok(())
    }},
    Opt { name: "syscalls", nargs: 1, apply: |cfg, v| {
        apply_syscalls(cfg, &v[0]);
        Ok(())
    }},
    Opt { name: "group", nargs: 1, apply: |cfg, v| {
        let gid: u32 = v[0].parse().context("bad group id")?;
        if gid != 0 {
            cfg.groups.push(gid);
        }
        Ok(())
    }},
    Opt { name: "interval", nargs: 1, apply: |cfg, v| {
        let seconds = parse_seconds(&v[0])?;
        let usec = (seconds * 1e6) as i64;
        if usec > 0 {
            cfg.interval_usec = usec as u64;
        }
        Ok(())
    }},
    Opt { name: "cgname", nargs: 1, apply: |cfg, v| {
        cfg.cgname = Some(v[0].clone());
        Ok(())
    }},
    Opt { name: "hostname", nargs: 1, apply: |cfg, v| {
        cfg.uts.nodename = Some(v[0].clone());
        Ok(())
    }},
    Opt { name: "domainname", nargs: 1, apply: |cfg, v| {
        cfg.uts.domainname = Some(v[0].clone());
        Ok(())
    }},
    // The next three take effect only on kernels patched to expose the
    // corresponding /proc/sys/kernel files as writable.
    Opt { name: "ostype", nargs: 1, apply: |cfg, v| {
        cfg.uts.sysname = Some(v[0].clone());
        Ok(())
    }},
    Opt { name: "osrelease", nargs: 1, apply: |cfg, v| {
        cfg.uts.release = Some(v[0].clone());
        Ok(())
    }},
    Opt { name: "osversion", nargs: 1, apply: |cfg, v| {
        cfg.uts.version = Some(v[0].clone());
        Ok(())
    }},
    Opt { name: "remount-ro", nargs: 1, apply: |cfg, v| {
        cfg.remount_ro.insert(PathBuf::from(&v[0]));
        Ok(())
    }},
    Opt { name: "bindfs", nargs: 2, apply: |cfg, v| {
        cfg.bindfs_list.push((PathBuf::from(&v[0]), PathBuf::from(&v[1])));
        Ok(())
    }},
    Opt { name: "bindfs-ro", nargs: 2, apply: |cfg, v| {
        let dest = PathBuf::from(&v[0]);
        cfg.bindfs_list.push((dest.clone(), PathBuf::from(&v[1])));
        cfg.remount_ro.insert(dest);
        Ok(())
    }},
    Opt { name: "tmpfs", nargs: 2, apply: |cfg, v| {
        cfg.tmpfs_list.push((PathBuf::from(&v[0]), parse_bytes(&v[1])?));
        Ok(())
    }},
    Opt { name: "env", nargs: 2, apply: |cfg, v| {
        cfg.env_list.push((v[0].clone(), v[1].clone()));
        Ok(())
    }},
    Opt { name: "cgroup-option", nargs: 3, apply: |cfg, v| {
        match Subsys::from_name(&v[0]) {
            Some(subsys) => cfg.cgroup_options.push((subsys, v[1].clone(), v[2].clone())),
            None => eprintln!(
                "corral: cgroup option '{}' = '{}' ignored: subsystem '{}' not found",
                v[1], v[2], v[0]
            ),
        }
        Ok(())
    }},
    Opt { name: "fd", nargs: 1, apply: |cfg, v| {
        cfg.keep_fds.insert(v[0].parse().context("bad fd")?);
        Ok(())
    }},
    Opt { name: "cmd", nargs: 1, apply: |cfg, v| {
        cfg.cmd_list.push(v[0].clone());
        Ok(())
    }},
    Opt { name: "debug", nargs: 0, apply: |_, _| Ok(()) },
    Opt { name: "status", nargs: 0, apply: |_, _| Ok(()) },
];

/// Parse a full command line (without argv\[0\]).
pub fn parse(args: &[String]) -> Result<Parsed> {
    let mut cfg = Config::default();
    let mut debug = false;
    let mut status = false;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];

        if !arg.starts_with("--") {
            cfg.argv = args[i..].to_vec();
            break;
        }
        if arg == "--" {
            cfg.argv = args[i + 1..].to_vec();
            break;
        }

        let name = &arg[2..];
        match name {
            "help" => return Ok(Parsed { action: Action::Help, debug, status }),
            "help-syscalls" => {
                return Ok(Parsed { action: Action::HelpSyscalls, debug, status })
            }
            "version" => return Ok(Parsed { action: Action::Version, debug, status }),
            "debug" => debug = true,
            "status" => status = true,
            _ => {}
        }

        let Some(opt) = TABLE.iter().find(|opt| opt.name == name) else {
            bail!("Unknown option: `--{name}`");
        };
        if i + opt.nargs >= args.len() {
            bail!(
                "Option '--{name}' requires {} argument{}.",
                opt.nargs,
                if opt.nargs > 1 { "s" } else { "" }
            );
        }
        let operands = &args[i + 1..i + 1 + opt.nargs];
        (opt.apply)(&mut cfg, operands)
            .with_context(|| format!("Bad value for option '--{name}'"))?;
        i += 1 + opt.nargs;
    }

    Ok(Parsed {
        action: Action::Run(Box::new(cfg)),
        debug,
        status,
    })
}

/// A leading `!` or `-` flips the filter into blacklist mode; `=` and `+`
/// spell the whitelist default explicitly.
fn apply_syscalls(cfg: &mut Config, text: &str) {
    cfg.syscall_action = SyscallAction::DefaultEperm;
    match text.chars().next() {
        Some('!') | Some('-') => {
            cfg.syscall_action = SyscallAction::OthersEperm;
            cfg.syscall_list = text[1..].to_string();
        }
        Some('=') | Some('+') => {
            cfg.syscall_list = text[1..].to_string();
        }
        _ => cfg.syscall_list = text.to_string(),
    }
}

fn parse_seconds(text: &str) -> Result<f64> {
    text.parse().with_context(|| format!("bad seconds value `{text}`"))
}

fn parse_u64(text: &str) -> Result<u64> {
    text.parse().with_context(|| format!("bad number `{text}`"))
}

fn parse_octal(text: &str) -> Result<u32> {
    let digits = text.strip_prefix("0o").unwrap_or(text);
    u32::from_str_radix(digits, 8).with_context(|| format!("bad octal value `{text}`"))
}

/// Byte counts accept the usual binary suffixes: `64m`, `1k`, `2g`.
fn parse_bytes(text: &str) -> Result<i64> {
    let lower = text.trim().to_ascii_lowercase();
    let (digits, multiplier) = match lower.as_bytes().last() {
        Some(b'k') => (&lower[..lower.len() - 1], 1i64 << 10),
        Some(b'm') => (&lower[..lower.len() - 1], 1i64 << 20),
        Some(b'g') => (&lower[..lower.len() - 1], 1i64 << 30),
        Some(b'b') => (&lower[..lower.len() - 1], 1),
        _ => (lower.as_str(), 1),
    };
    let value: i64 = digits
        .parse()
        .with_context(|| format!("bad byte count `{text}`"))?;
    Ok(value.saturating_mul(multiplier))
}

fn parse_bool(text: &str) -> Result<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        _ => bail!("bad boolean `{text}` (use true or false)"),
    }
}

pub fn help_text() -> String {
    format!(
        "Run a command with resources limited and namespaces isolated.\n\
         \n\
         Usage: corral [options] [--] command args... [3>stat]\n\
         \n\
         Options:\n\
         \x20 --max-cpu-time    seconds     Limit CPU time; `seconds` may be fractional\n\
         \x20 --max-real-time   seconds     Limit wall-clock time\n\
         \x20 --max-memory      bytes       Limit memory (+swap) usage; supports k, m, g suffixes\n\
         \x20 --max-output      bytes       Limit output; enforced by polling, best effort\n\
         \x20 --max-rtprio      n           Set max realtime priority\n\
         \x20 --max-nfile       n           Set max number of open file descriptors\n\
         \x20 --max-stack       bytes       Set max stack size per process\n\
         \x20 --max-nprocess    n           Set RLIMIT_NPROC; the user namespace is shared, so\n\
         \x20                               existing processes of that uid count\n\
         \x20 --isolate-process bool        Isolate PID and IPC namespaces\n\
         \x20 --basic-devices   bool        Devices whitelist: null, zero, full, random, urandom\n\
         \x20 --remount-dev     bool        Remount /dev with only the basic device files\n\
         \x20 --reset-env       bool        Clean environment variables\n\
         \x20 --network         bool        Whether network access is permitted\n\
         \x20 --pass-exitcode   bool        Pass the child's exit code through\n\
         \x20 --chroot          path        Chroot to `path` before exec\n\
         \x20 --chdir           path        Chdir to `path` after chroot\n\
         \x20 --nice            value       Add nice; only root may pass a negative value\n\
         \x20 --umask           octal       Set umask\n\
         \x20 --uid             uid         Set uid (must be > 0); only root can use this\n\
         \x20 --gid             gid         Set gid (must be > 0); only root can use this\n\
         \x20 --no-new-privs    bool        Forbid gaining privileges via exec (sudo, ping, ...);\n\
         \x20                               only root may set it to false\n\
         \x20 --syscalls        filter      Apply a syscall filter; a leading '!' makes it a\n\
         \x20                               blacklist. See --help-syscalls for the grammar\n\
         \x20 --cgname          string      Reuse a named cgroup and leave it in place on exit;\n\
         \x20                               without it a per-invocation group is created and\n\
         \x20                               destroyed\n\
         \x20 --hostname        string      Set a new hostname inside a UTS namespace\n\
         \x20 --interval        seconds     Status poll interval\n\
         \x20 --debug                       Verbose diagnostics on stderr\n\
         \x20 --status                      Trace per-tick resource usage\n\
         \x20 --help                        Show this help\n\
         \x20 --help-syscalls               Show the syscall filter grammar\n\
         \x20 --version                     Show version information\n\
         \n\
         Options that may be used multiple times:\n\
         \x20 --bindfs          dest src    Bind `src` to `dest` (before chroot)\n\
         \x20 --bindfs-ro       dest src    Like --bindfs, and remount `dest` read-only\n\
         \x20 --tmpfs           path bytes  Mount a tmpfs of `bytes` at `path` (after chroot);\n\
         \x20                               0 bytes mounts it read-only\n\
         \x20 --env             key value   Set an environment variable\n\
         \x20 --cgroup-option   subsys k v  Apply a raw cgroup setting before exec\n\
         \x20 --fd              n           Do not close fd `n`\n\
         \x20 --cmd             cmd         Run a shell command after mounts; root only\n\
         \x20 --group           gid         Add a supplementary group; root only\n\
         \n\
         Return value:\n\
         \x20 - 0 when the command was supervised to completion, with the resource report\n\
         \x20   written to fd 3 (or the child's exit code under --pass-exitcode)\n\
         \x20 - 1..9 for configuration, environment and cgroup errors; 10..20 when a launch\n\
         \x20   stage fails, and nothing is written to fd 3\n\
         \n\
         Option processing order:\n\
         \x20 --hostname, --fd, --bindfs, --bindfs-ro, --chroot, (mount /proc), --tmpfs,\n\
         \x20 --remount-dev, --chdir, --cmd, --umask, --gid, --uid, (rlimit options), --env,\n\
         \x20 --nice, (cgroup limits), --syscalls\n\
         \n\
         Default options:\n\
         \x20 corral --network true --basic-devices false --isolate-process true \\\n\
         \x20        --remount-dev false --reset-env false --interval 0.02 \\\n\
         \x20        --pass-exitcode false --no-new-privs true --max-nprocess 2048 \\\n\
         \x20        --max-nfile 256 --max-rtprio 0 --nice 0\n"
    )
}

pub fn help_syscalls_text() -> String {
    "--syscalls FILTER\n\
     \x20 Unlisted syscalls fail with EPERM (whitelist mode).\n\
     \n\
     --syscalls !FILTER\n\
     \x20 Unlisted syscalls are allowed (blacklist mode).\n\
     \n\
     Format:\n\
     \x20 FILTER       := RULE | FILTER ',' RULE\n\
     \x20 RULE         := NAME ARG_RULES? ACTION?\n\
     \x20 ARG_RULES    := '[' ARG_RULE (',' ARG_RULE)* ']'\n\
     \x20 ARG_RULE     := ARG OP1 NUMBER | ARG '&' NUMBER '=' NUMBER\n\
     \x20 ARG          := 'a' | 'b' | 'c' | 'd' | 'e' | 'f'\n\
     \x20 OP1          := '==' | '=' | '!=' | '!' | '>' | '<' | '>=' | '<='\n\
     \x20 ACTION       := ':k' | ':e' | ':a'\n\
     \n\
     Notes:\n\
     \x20 ARG:    `a` is the first syscall argument, `b` the second, ...\n\
     \x20 OP1:    `=` is short for `==`, `!` is short for `!=`\n\
     \x20 '&':    bitwise and with the mask, then compare\n\
     \x20 ACTION: `k` kills the process, `e` returns EPERM, `a` allows\n\
     \x20 NAME:   a syscall name or a decimal syscall number\n\
     \n\
     Examples:\n\
     \x20 --syscalls 'read,write,open,exit'\n\
     \x20   Only read, write, open and exit are allowed\n\
     \x20 --syscalls '!write[a=2]'\n\
     \x20   Disallow writes to fd 2 (stderr)\n\
     \x20 --syscalls '!sethostname:k'\n\
     \x20   Whoever calls sethostname gets killed\n\
     \x20 --syscalls '!clone[a&268435456==268435456]'\n\
     \x20   Refuse creation of new user namespaces (CLONE_NEWUSER = 0x10000000)\n"
        .to_string()
}

pub fn version_text() -> String {
    format!(
        "corral {}\n\nseccomp filter support: yes\n",
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn run_cfg(args: &[&str]) -> Config {
        match parse(&argv(args)).unwrap().action {
            Action::Run(cfg) => *cfg,
            _ => panic!("expected a run action"),
        }
    }

    #[test]
    fn command_line_starts_at_first_non_option() {
        let cfg = run_cfg(&["--max-cpu-time", "0.5", "/bin/echo", "--not-an-option"]);
        assert_eq!(cfg.cpu_time_limit, 0.5);
        assert_eq!(cfg.argv, vec!["/bin/echo", "--not-an-option"]);
    }

    #[test]
    fn double_dash_ends_options() {
        let cfg = run_cfg(&["--", "--max-cpu-time", "1"]);
        assert_eq!(cfg.cpu_time_limit, -1.0);
        assert_eq!(cfg.argv, vec!["--max-cpu-time", "1"]);
    }

    #[test]
    fn unknown_option_is_an_error() {
        let err = parse(&argv(&["--frobnicate"])).unwrap_err();
        assert!(err.to_string().contains("--frobnicate"));
    }

    #[test]
    fn missing_operand_is_an_error() {
        let err = parse(&argv(&["--max-memory"])).unwrap_err();
        assert!(err.to_string().contains("requires 1 argument"));
        let err = parse(&argv(&["--bindfs", "/only-dest"])).unwrap_err();
        assert!(err.to_string().contains("requires 2 arguments"));
    }

    #[test]
    fn byte_suffixes() {
        assert_eq!(parse_bytes("1k").unwrap(), 1024);
        assert_eq!(parse_bytes("64m").unwrap(), 64 << 20);
        assert_eq!(parse_bytes("2G").unwrap(), 2i64 << 30);
        assert_eq!(parse_bytes("123").unwrap(), 123);
        assert!(parse_bytes("12q").is_err());
    }

    #[test]
    fn small_memory_limit_is_raised() {
        let cfg = run_cfg(&["--max-memory", "1k", "/bin/true"]);
        assert_eq!(cfg.memory_limit, 500_000);
    }

    #[test]
    fn max_output_also_sets_fsize_rlimit() {
        let cfg = run_cfg(&["--max-output", "1k", "/bin/true"]);
        assert_eq!(cfg.output_limit, 1024);
        assert_eq!(cfg.rlimits.get(&RlimitKey::Fsize), Some(&1024));
    }

    #[test]
    fn bind_order_is_preserved_across_both_spellings() {
        let cfg = run_cfg(&[
            "--bindfs", "/a", "/src-a",
            "--bindfs-ro", "/b", "/src-b",
            "--bindfs", "/c", "/src-c",
            "/bin/true",
        ]);
        let dests: Vec<_> = cfg
            .bindfs_list
            .iter()
            .map(|(d, _)| d.to_str().unwrap())
            .collect();
        assert_eq!(dests, vec!["/a", "/b", "/c"]);
        assert!(cfg.remount_ro.contains(&PathBuf::from("/b")));
        assert!(!cfg.remount_ro.contains(&PathBuf::from("/a")));
    }

    #[test]
    fn syscalls_prefix_selects_mode() {
        let cfg = run_cfg(&["--syscalls", "read,write", "/bin/true"]);
        assert_eq!(cfg.syscall_action, SyscallAction::DefaultEperm);
        assert_eq!(cfg.syscall_list, "read,write");

        let cfg = run_cfg(&["--syscalls", "!sethostname:k", "/bin/true"]);
        assert_eq!(cfg.syscall_action, SyscallAction::OthersEperm);
        assert_eq!(cfg.syscall_list, "sethostname:k");

        let cfg = run_cfg(&["--syscalls", "=read", "/bin/true"]);
        assert_eq!(cfg.syscall_action, SyscallAction::DefaultEperm);
        assert_eq!(cfg.syscall_list, "read");
    }

    #[test]
    fn umask_is_octal() {
        let cfg = run_cfg(&["--umask", "077", "/bin/true"]);
        assert_eq!(cfg.umask, 0o077);
    }

    #[test]
    fn interval_ignores_non_positive_values() {
        let cfg = run_cfg(&["--interval", "0.5", "/bin/true"]);
        assert_eq!(cfg.interval_usec, 500_000);
        let cfg = run_cfg(&["--interval", "0", "/bin/true"]);
        assert_eq!(cfg.interval_usec, 20_000);
    }

    #[test]
    fn min_nice_maps_to_nice_rlimit() {
        let cfg = run_cfg(&["--min-nice", "-5", "/bin/true"]);
        assert_eq!(cfg.rlimits.get(&RlimitKey::Nice), Some(&25));
    }

    #[test]
    fn group_zero_is_ignored() {
        let cfg = run_cfg(&["--group", "0", "--group", "27", "/bin/true"]);
        assert_eq!(cfg.groups, vec![27]);
    }

    #[test]
    fn uts_options_populate_the_spec() {
        let cfg = run_cfg(&["--hostname", "judge", "--domainname", "local", "/bin/true"]);
        assert_eq!(cfg.uts.nodename.as_deref(), Some("judge"));
        assert_eq!(cfg.uts.domainname.as_deref(), Some("local"));
        assert!(cfg.uts.any());
    }

    #[test]
    fn logging_flags_are_carried_out_of_band() {
        let parsed = parse(&argv(&["--debug", "--status", "/bin/true"])).unwrap();
        assert!(parsed.debug);
        assert!(parsed.status);
        match parsed.action {
            Action::Run(cfg) => assert_eq!(cfg.argv, vec!["/bin/true"]),
            _ => panic!("expected a run action"),
        }
    }

    #[test]
    fn help_lists_the_processing_order() {
        let help = help_text();
        assert!(help.contains("Option processing order:"));
        assert!(help.contains("--hostname, --fd, --bindfs, --bindfs-ro, --chroot, (mount /proc)"));
    }
}
