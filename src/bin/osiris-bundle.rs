//! Osiris Bundle Tooling
//!
//! This is the entry-point of `osiris-bundle`, a command-line tool to package
//! the managed assemblies of an application for Android. Its main input is
//! the `osiris-bundle.toml` manifest, which specifies how assemblies are
//! packaged, and the resolved assembly list produced by earlier build stages.
//!
//! See the documentation of the `osiris-bundle` library for details on the
//! manifest, the packaging pipeline, and the generated native index.
//!
//! This CLI is mainly a dispatcher of all the operations available in
//! `osiris_bundle::op::*`. It is a simple clap-based CLI that forwards the
//! arguments to `osiris_bundle` and visualizes the results.

struct Cli {
    cmd: clap::Command,
}

fn arg_arch(
    s: &str,
) -> Result<osiris_bundle::platform::android::Arch, clap::error::Error> {
    s.parse().map_err(
        |_| {
            clap::error::Error::raw(
                clap::error::ErrorKind::ValueValidation,
                "Invalid Android ABI or runtime identifier",
            )
        }
    )
}

impl Cli {
    fn new() -> Self {
        let mut cmd;

        cmd = clap::Command::new("osiris-bundle")
            .propagate_version(true)
            .subcommand_required(true)
            .about("Osiris Bundle Tooling")
            .long_about("Package managed assemblies for Android applications")
            .version(clap::crate_version!());

        cmd = cmd.arg(
            clap::Arg::new("manifest")
                .long("manifest")
                .value_name("PATH")
                .help("Path to the bundle manifest relative to the working directory")
                .default_value("./osiris-bundle.toml")
                .value_parser(clap::builder::ValueParser::path_buf())
        );

        cmd = cmd.arg(
            clap::Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Log debug messages")
                .global(true)
                .action(clap::ArgAction::SetTrue)
        );

        cmd = cmd.subcommand(
            clap::Command::new("package")
                .about("Package assemblies and generate the native index")
                .arg(
                    clap::Arg::new("assemblies")
                        .long("assemblies")
                        .value_name("PATH")
                        .help("Path to the resolved assembly list")
                        .required(true)
                        .value_parser(clap::builder::ValueParser::path_buf())
                )
                .arg(
                    clap::Arg::new("project")
                        .long("project")
                        .value_name("PATH")
                        .help("Path identifying the project, defaults to the application path")
                        .value_parser(clap::builder::ValueParser::path_buf())
                )
        );

        cmd = cmd.subcommand(
            clap::Command::new("wrap")
                .about("Wrap a single file into a native container")
                .arg(
                    clap::Arg::new("input")
                        .long("input")
                        .value_name("PATH")
                        .help("Path to the file to wrap")
                        .required(true)
                        .value_parser(clap::builder::ValueParser::path_buf())
                )
                .arg(
                    clap::Arg::new("name")
                        .long("name")
                        .value_name("NAME")
                        .help("Name of the container, derived from the input if missing")
                )
                .arg(
                    clap::Arg::new("abi")
                        .long("abi")
                        .value_name("ABI")
                        .help("Android ABI of the container")
                        .required(true)
                        .value_parser(arg_arch)
                )
                .arg(
                    clap::Arg::new("output")
                        .long("output")
                        .value_name("PATH")
                        .help("Path of the container to write")
                        .required(true)
                        .value_parser(clap::builder::ValueParser::path_buf())
                )
        );

        Self {
            cmd: cmd,
        }
    }

    fn manifest(
        &self,
        m: &clap::ArgMatches,
    ) -> Result<(osiris_bundle::manifest::Manifest, std::path::PathBuf), u8> {
        let Some(path) = m.get_one::<std::path::PathBuf>("manifest") else {
            eprintln!("Cannot acquire manifest path");
            return Err(2);
        };

        // Relative paths in the manifest are relative to its directory.
        let base = path.parent()
            .filter(|v| !v.as_os_str().is_empty())
            .map_or_else(|| std::path::PathBuf::from("."), |v| v.to_path_buf());

        match osiris_bundle::manifest::Manifest::parse_path(path) {
            Err(e) => {
                eprintln!("Cannot parse bundle manifest {:?}: {}", path, e);
                Err(1)
            },
            Ok(v) => {
                Ok((v, base))
            },
        }
    }

    fn op_package(
        &self,
        m: &clap::ArgMatches,
        m_op: &clap::ArgMatches,
    ) -> Result<(), u8> {
        let (manifest, base) = self.manifest(m)?;
        let Some(assemblies) = m_op.get_one::<std::path::PathBuf>("assemblies") else {
            eprintln!("Assemblies-flag lacks a value");
            return Err(2);
        };

        let project = match m_op.get_one::<std::path::PathBuf>("project") {
            Some(v) => v.clone(),
            None => base.join(
                manifest.raw.application.as_ref()
                    .and_then(|v| v.path.as_deref())
                    .unwrap_or(".")
            ),
        };

        let list = match osiris_bundle::assembly::AssemblyList::parse_path(assemblies) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Cannot package assemblies: {}", e);
                return Err(1);
            },
        };

        let options = osiris_bundle::op::package::Options {
            packaging: manifest.view_packaging(&base),
            project: project,
            application: manifest.application_name().map(|v| v.to_string()),
        };
        let cancel = std::sync::atomic::AtomicBool::new(false);

        match osiris_bundle::op::package::package(&options, &list, &cancel) {
            Err(e) => {
                eprintln!("Cannot package assemblies: {}", e);
                Err(1)
            },
            Ok(report) => {
                if let Some(name) = &report.application {
                    println!("Packaged {}", name);
                }
                for arch in report.archs.iter() {
                    println!(
                        "{}: {} containers, index {:?} ({})",
                        arch.arch,
                        arch.containers.len(),
                        arch.index,
                        if arch.index_rewritten { "rewritten" } else { "unchanged" },
                    );
                }
                Ok(())
            },
        }
    }

    fn op_wrap(
        &self,
        m_op: &clap::ArgMatches,
    ) -> Result<(), u8> {
        let (Some(input), Some(arch), Some(output)) = (
            m_op.get_one::<std::path::PathBuf>("input"),
            m_op.get_one::<osiris_bundle::platform::android::Arch>("abi"),
            m_op.get_one::<std::path::PathBuf>("output"),
        ) else {
            eprintln!("Wrap-flags lack a value");
            return Err(2);
        };
        let name = m_op.get_one::<String>("name");

        match osiris_bundle::op::wrap::wrap(*arch, input, name.map(|v| v.as_str()), output) {
            Err(e) => {
                eprintln!("Cannot wrap {:?}: {}", input, e);
                Err(1)
            },
            Ok((name, update)) => {
                println!(
                    "{}: {:?} ({})",
                    name,
                    output,
                    if update.rewritten() { "rewritten" } else { "unchanged" },
                );
                Ok(())
            },
        }
    }

    fn run(mut self) -> Result<(), u8> {
        let (m, r);

        r = self.cmd.try_get_matches_from_mut(
            std::env::args_os(),
        );

        match r {
            Ok(v) => m = v,
            Err(e) => {
                let _ = e.print();
                return match e.kind() {
                    clap::error::ErrorKind::DisplayHelp |
                    clap::error::ErrorKind::DisplayVersion => Ok(()),
                    _ => Err(2),
                }
            }
        }

        // Warnings by default, `RUST_LOG` takes precedence over `--verbose`.
        let level = if m.get_flag("verbose") { "debug" } else { "warn" };
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(level),
        ).init();

        match m.subcommand() {
            Some(("package", m_op)) => self.op_package(&m, m_op),
            Some(("wrap", m_op)) => self.op_wrap(m_op),
            _ => std::unreachable!(),
        }
    }
}

fn main() -> std::process::ExitCode {
    match Cli::new().run() {
        Ok(()) => 0.into(),
        Err(v) => v.into(),
    }
}
