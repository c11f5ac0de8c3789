//! OxiZip CLI - concurrent ZIP archiver
//!
//! Creates, lists, extracts and verifies ZIP archives with Zip64,
//! traditional PKWARE encryption and WinZip AES.

mod commands;
mod utils;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use commands::{
    CompressionLevel, CreateOptions, EncryptionKind, ExtractOptions, ListOptions, cmd_create,
    cmd_extract, cmd_info, cmd_list, cmd_test,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "oxizip")]
#[command(author, version, about = "Concurrent ZIP archiver - Pure Rust")]
#[command(long_about = "
OxiZip writes and reads ZIP archives, compressing entries in parallel.
It supports Zip64, traditional PKWARE encryption and WinZip AES.

Examples:
  oxizip create backup.zip docs/ notes.txt
  oxizip create secret.zip data/ --encryption aes256
  oxizip list backup.zip --verbose
  oxizip extract backup.zip -o restored/
  oxizip test secret.zip --password hunter2
  oxizip info backup.zip
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new archive
    #[command(alias = "c")]
    Create {
        /// Output archive file
        archive: PathBuf,

        /// Files and directories to add
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Store entries without compression
        #[arg(long)]
        store: bool,

        /// Compression level
        #[arg(short = 'l', long, value_enum, default_value = "normal")]
        level: CompressionLevel,

        /// Encrypt entries
        #[arg(short, long, value_enum)]
        encryption: Option<EncryptionKind>,

        /// Password (prompted for if encryption is set and this is not)
        #[arg(short, long)]
        password: Option<String>,

        /// Write entries as they finish instead of in the order added
        #[arg(long)]
        no_order: bool,

        /// Skip paths whose entry name matches this regex
        #[arg(short = 'x', long)]
        exclude: Vec<String>,

        /// Store names matching this regex without compression
        #[arg(long)]
        no_compress: Vec<String>,

        /// Archive comment
        #[arg(long)]
        comment: Option<String>,

        /// Entries compressed at once
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List contents of an archive
    #[command(alias = "l")]
    List {
        /// Archive file to list
        archive: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Output as JSON (machine-readable)
        #[arg(short, long)]
        json: bool,

        /// Include only entries matching pattern (glob syntax: *.txt, src/**/*)
        #[arg(short = 'I', long)]
        include: Vec<String>,

        /// Exclude entries matching pattern (glob syntax)
        #[arg(short = 'X', long)]
        exclude: Vec<String>,

        /// Codepage for names without the UTF-8 flag (e.g. cp437, shift_jis)
        #[arg(long)]
        encoding: Option<String>,
    },

    /// Extract files from an archive
    #[command(alias = "x")]
    Extract {
        /// Archive file to extract
        archive: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Password for encrypted entries
        #[arg(short, long)]
        password: Option<String>,

        /// Entries extracted at once
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Include only entries matching pattern (glob syntax)
        #[arg(short = 'I', long)]
        include: Vec<String>,

        /// Exclude entries matching pattern (glob syntax)
        #[arg(short = 'X', long)]
        exclude: Vec<String>,

        /// Authenticate AES entries before writing any of their data
        #[arg(long)]
        verify_first: bool,

        /// Codepage for names without the UTF-8 flag
        #[arg(long)]
        encoding: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Show progress bar
        #[arg(short = 'P', long, default_value = "true")]
        progress: bool,
    },

    /// Test archive integrity
    #[command(alias = "t")]
    Test {
        /// Archive file to test
        archive: PathBuf,

        /// Password for encrypted entries
        #[arg(short, long)]
        password: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show information about an archive
    #[command(alias = "i")]
    Info {
        /// Archive file to inspect
        archive: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Create {
            archive,
            paths,
            store,
            level,
            encryption,
            password,
            no_order,
            exclude,
            no_compress,
            comment,
            jobs,
            verbose,
        } => cmd_create(
            &archive,
            &paths,
            CreateOptions {
                store,
                level,
                encryption,
                password,
                no_order,
                exclude,
                no_compress,
                comment,
                jobs,
                verbose,
            },
        ),
        Commands::List {
            archive,
            verbose,
            json,
            include,
            exclude,
            encoding,
        } => cmd_list(
            &archive,
            &ListOptions {
                verbose,
                json,
                include: &include,
                exclude: &exclude,
                encoding: encoding.as_deref(),
            },
        ),
        Commands::Extract {
            archive,
            output,
            password,
            jobs,
            include,
            exclude,
            verify_first,
            encoding,
            verbose,
            progress,
        } => cmd_extract(
            &archive,
            &output,
            ExtractOptions {
                password,
                jobs,
                include: &include,
                exclude: &exclude,
                verify_first,
                encoding: encoding.as_deref(),
                verbose,
                progress,
            },
        ),
        Commands::Test {
            archive,
            password,
            verbose,
        } => cmd_test(&archive, password, verbose),
        Commands::Info { archive } => cmd_info(&archive),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "oxizip", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
