//! 命令行入口
//!
//! 用法：
//!   archive-engine encrypt <input> <output> [--password <pw>] [--algorithm ...] [--compress ...]
//!   archive-engine decrypt <input> <output> [--password <pw>]
//!
//! 未提供 `--password` 时从终端交互读取。所有实际逻辑都委托给库。

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use archive_engine::{
    Argon2Algorithm, Argon2Options, CompressAlgorithm, CompressOptions, CryptoAlgorithm,
    DEFAULT_CHUNK_SIZE, Decryptor, EncryptOptions, Encryptor, KeyDerivationOptions,
};

#[derive(Parser)]
#[command(name = "archive-engine", version, about = "Password-based streaming archive encryption")]
struct Cli {
    /// 提高日志级别（-v debug，-vv trace）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 加密文件
    Encrypt {
        #[command(flatten)]
        io: IoArgs,

        #[arg(long, default_value_t = archive_engine::algorithm::DEFAULT_CRYPTO_ALGORITHM)]
        algorithm: CryptoAlgorithm,

        /// gzip 或 brotli，缺省不压缩
        #[arg(long)]
        compress: Option<CompressAlgorithm>,

        #[arg(long = "argon2-algorithm", default_value_t = Argon2Algorithm::Argon2d)]
        argon2_algorithm: Argon2Algorithm,

        #[arg(long = "argon2-iterations", default_value_t = 3)]
        argon2_iterations: u32,

        /// KiB
        #[arg(long = "argon2-memory", default_value_t = 12)]
        argon2_memory: u32,

        #[arg(long = "argon2-parallelism", default_value_t = 1)]
        argon2_parallelism: u32,
    },
    /// 解密文件
    Decrypt {
        #[command(flatten)]
        io: IoArgs,
    },
}

#[derive(Args)]
struct IoArgs {
    input: PathBuf,
    output: PathBuf,

    #[arg(long)]
    password: Option<String>,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_password(given: Option<String>, confirm: bool) -> anyhow::Result<Zeroizing<String>> {
    if let Some(password) = given {
        return Ok(Zeroizing::new(password));
    }

    let password = Zeroizing::new(rpassword::prompt_password("Password: ").context("read password")?);
    if confirm {
        let again = Zeroizing::new(
            rpassword::prompt_password("Confirm password: ").context("read password")?,
        );
        if *password != *again {
            bail!("passwords do not match");
        }
    }
    Ok(password)
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Encrypt {
            io,
            algorithm,
            compress,
            argon2_algorithm,
            argon2_iterations,
            argon2_memory,
            argon2_parallelism,
        } => {
            if io.chunk_size == 0 {
                bail!("--chunk-size must be >= 1");
            }
            let argon2 = Argon2Options::new(
                argon2_algorithm,
                argon2_iterations,
                argon2_memory,
                argon2_parallelism,
            )?;
            let options = EncryptOptions {
                algorithm,
                key_derivation: KeyDerivationOptions::Argon2(argon2),
                compress: compress.map(CompressOptions::from_algorithm),
            };
            let password = read_password(io.password, true)?;

            let encryptor = Encryptor::new(options);
            archive_engine::encrypt_file_with(
                &encryptor,
                &io.input,
                &io.output,
                password.as_str(),
                io.chunk_size,
            )
            .with_context(|| format!("encrypt {}", io.input.display()))?;
            info!(output = %io.output.display(), "encrypted");
        }
        Command::Decrypt { io } => {
            if io.chunk_size == 0 {
                bail!("--chunk-size must be >= 1");
            }
            let password = read_password(io.password, false)?;

            archive_engine::decrypt_file_with(
                &Decryptor::new(),
                &io.input,
                &io.output,
                password.as_str(),
                io.chunk_size,
            )
            .with_context(|| format!("decrypt {}", io.input.display()))?;
            info!(output = %io.output.display(), "decrypted");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
