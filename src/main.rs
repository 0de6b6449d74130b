use anyhow::{Context, Result};
use clap::Parser;
use cudapack::pipeline::{self, BuildOptions};
use cudapack::platform::Platform;
use cudapack::registry::Registry;
use std::path::PathBuf;

/// cudapack - repackage NVIDIA CUDA toolkit installers
///
/// Downloads the vendor installer for a product version, unpacks it with the
/// platform's native mechanism, and copies one package's libraries (with
/// their symlink alias chains intact) into the install prefix for
/// redistribution.
///
/// Examples:
///   cudapack build --version 8.0 --package cudart --prefix /opt/pkg
#[derive(Parser, Debug)]
#[command(author, version = env!("CUDAPACK_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Registry data file (JSON; defaults to the built-in registry)
    #[arg(long = "registry", value_name = "PATH", global = true)]
    registry: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build one package from a vendor installer
    Build(BuildArgs),

    /// List known versions and their packages
    List(ListArgs),
}

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// Product version to build (e.g. 8.0)
    #[arg(long, env = "PKG_VERSION", value_name = "VERSION")]
    pub version: String,

    /// Package to materialize
    #[arg(long, env = "PKG_NAME", value_name = "NAME")]
    pub package: String,

    /// Install prefix receiving the library directory
    #[arg(long, env = "PREFIX", value_name = "PATH")]
    pub prefix: PathBuf,

    /// Directory holding (or receiving) the downloaded blobs
    #[arg(long, env = "SRC_DIR", value_name = "PATH")]
    pub src_dir: Option<PathBuf>,

    /// Staging directory for extraction (defaults to <src-dir>/blob_files)
    #[arg(long, value_name = "PATH")]
    pub staging_dir: Option<PathBuf>,

    /// Platform to build for (defaults to the current one)
    #[arg(long, value_enum)]
    pub platform: Option<Platform>,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Only show this version
    #[arg(long, value_name = "VERSION")]
    pub version: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let registry = match &cli.registry {
        Some(path) => Registry::from_path(path)?,
        None => Registry::builtin(),
    };

    match cli.command {
        Commands::Build(args) => {
            let src_dir = match args.src_dir {
                Some(path) => path,
                None => default_src_dir()?,
            };
            pipeline::run(
                &registry,
                BuildOptions {
                    version: args.version,
                    package: args.package,
                    prefix: args.prefix,
                    src_dir,
                    staging_dir: args.staging_dir,
                    platform: args.platform,
                },
            )
            .await
        }
        Commands::List(args) => list(&registry, args.version.as_deref()),
    }
}

fn default_src_dir() -> Result<PathBuf> {
    let cache = dirs::cache_dir().context("cannot determine a cache directory, pass --src-dir")?;
    Ok(cache.join("cudapack"))
}

fn list(registry: &Registry, only: Option<&str>) -> Result<()> {
    for version in registry.versions() {
        if only.is_some_and(|v| v != version) {
            continue;
        }
        let spec = registry.version(version)?;
        println!("{}", version);
        for package in spec.package_names() {
            println!("  {}", package);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_build_parsing() {
        let cli = Cli::try_parse_from([
            "cudapack", "build", "--version", "8.0", "--package", "cudart", "--prefix", "/opt/pkg",
        ])
        .unwrap();
        match cli.command {
            Commands::Build(args) => {
                assert_eq!(args.version, "8.0");
                assert_eq!(args.package, "cudart");
                assert_eq!(args.prefix, PathBuf::from("/opt/pkg"));
                assert_eq!(args.src_dir, None);
                assert_eq!(args.platform, None);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_cli_build_platform_override() {
        let cli = Cli::try_parse_from([
            "cudapack", "build", "--version", "7.5", "--package", "nvvm", "--prefix", "/p",
            "--platform", "osx",
        ])
        .unwrap();
        match cli.command {
            Commands::Build(args) => assert_eq!(args.platform, Some(Platform::Osx)),
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_cli_list_parsing() {
        let cli = Cli::try_parse_from(["cudapack", "list", "--version", "8.0"]).unwrap();
        match cli.command {
            Commands::List(args) => assert_eq!(args.version.as_deref(), Some("8.0")),
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_cli_global_registry_flag() {
        let cli = Cli::try_parse_from(["cudapack", "--registry", "/tmp/reg.json", "list"]).unwrap();
        assert_eq!(cli.registry, Some(PathBuf::from("/tmp/reg.json")));
    }

    #[test]
    fn test_cli_build_requires_package() {
        let result = Cli::try_parse_from(["cudapack", "build", "--version", "8.0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        let result = Cli::try_parse_from(["cudapack"]);
        assert!(result.is_err());
    }
}
