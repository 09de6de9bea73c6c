//! dom-mirror command-line driver
//!
//! Clones documents, records operation streams from a scripted edit session
//! and prints recorded streams.

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use dom_mirror::digest::to_hex;
use dom_mirror::xml::node_to_string;
use dom_mirror::{
    clone_document, decode_operations, digest, new_element, new_text, parse_file, ApplyPatch,
    BuiltinCodec, CodecProvider, DestinationAddresses, Document, EncodeMutations, MutationLogger,
    MutationRecord, NodeInner, NodeRef, SourceAddresses, SyncConfig, Synchronizer, XmlPrinter,
};
use tracing::info;

/// One-way document mirroring tool
#[derive(Parser)]
#[command(name = "mirror")]
#[command(version)]
#[command(about = "Mirror a source document into a destination through an operation stream", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Do not install the per-operation logger
    #[arg(long, global = true)]
    omit_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone a document and print the neutralized copy
    #[command(visible_alias = "c")]
    Clone {
        /// Source document
        source: PathBuf,
        /// Output file (default: stdout)
        output: Option<PathBuf>,
    },

    /// Print the operations in a recorded stream
    #[command(visible_alias = "i")]
    Inspect {
        /// Operation stream file
        stream: PathBuf,
    },

    /// Mirror a document through a scripted edit session
    #[command(visible_alias = "r")]
    Record {
        /// Source document
        source: PathBuf,
        /// Write the captured operation stream here
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Clone { source, output } => run_clone(source, output),
        Commands::Inspect { stream } => run_inspect(stream),
        Commands::Record { source, out } => run_record(source, out, cli.omit_log),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = match verbose {
        0 => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "dom_mirror=info,mirror_cli=info".into()),
        1 => tracing_subscriber::EnvFilter::new("debug"),
        _ => tracing_subscriber::EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Clones a document and prints the destination.
fn run_clone(source_path: PathBuf, output_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Parsing source: {}", source_path.display());
    let source = parse_file(&source_path)?;

    let bootstrap = clone_document(&source)?;
    write_document(&bootstrap.destination, output_path)?;

    let source_digest = digest(&source);
    let matches = source_digest == digest(&bootstrap.destination);
    eprintln!(
        "Clone complete: {} nodes, digest {} ({}).",
        bootstrap.addresses.destination().len(),
        to_hex(&source_digest),
        if matches { "match" } else { "MISMATCH" }
    );
    Ok(())
}

/// Decodes a stream file and prints one operation per line.
fn run_inspect(stream_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(&stream_path)?;
    let ops = decode_operations(&bytes)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (seq, op) in ops.iter().enumerate() {
        writeln!(out, "{:>4}  {}", seq, op)?;
    }
    eprintln!("{} operations in {} bytes.", ops.len(), bytes.len());
    Ok(())
}

/// Starts a synchronizer, applies a fixed set of edits to the source and
/// reports whether the destination followed.
fn run_record(
    source_path: PathBuf,
    out_path: Option<PathBuf>,
    omit_log: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = SyncConfig {
        source: Some(source_path),
        omit_log,
    };
    let stream = Rc::new(RefCell::new(Vec::new()));
    let mut sync = Synchronizer::new(
        config,
        Some(Box::new(RecordingCodec {
            stream: stream.clone(),
        })),
    );

    let source = sync.load_source()?;
    sync.start(&source)?;
    let edits = scripted_edits(&source)?;
    let batches = sync.process_pending()?;
    info!(edits, batches, "edit session finished");

    let bytes = stream.borrow();
    match out_path {
        Some(path) => {
            fs::write(&path, bytes.as_slice())?;
            eprintln!("Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => {
            for op in decode_operations(&bytes)? {
                println!("{}", op);
            }
        }
    }

    let converged = sync.is_converged(&source);
    sync.stop();
    eprintln!(
        "Record complete: {} batches, {}.",
        batches,
        if converged { "converged" } else { "DIVERGED" }
    );
    if converged {
        Ok(())
    } else {
        Err("destination did not converge".into())
    }
}

/// Appends a paragraph to the body (or root), tags the root and changes the
/// first form control. Returns the number of edits made.
fn scripted_edits(source: &Document) -> dom_mirror::Result<usize> {
    let root = source.root();
    let container = find_element(&root, "body").unwrap_or_else(|| root.clone());

    let paragraph = new_element("p");
    NodeInner::add_child_to_ref(&paragraph, new_text("mirrored"));
    source.append_child(&container, paragraph.clone())?;
    let appended = node_to_string(&paragraph)?;
    info!(node = %appended, "appended to source");
    source.set_attribute(&root, "data-mirror", "recorded")?;
    let mut edits = 2;

    let control = NodeInner::preorder(&root)
        .into_iter()
        .find(|n| n.borrow().element().is_some_and(|e| e.is_control()));
    if let Some(control) = control {
        source.set_control_value(&control, "changed")?;
        edits += 1;
    }
    Ok(edits)
}

fn find_element(root: &NodeRef, name: &str) -> Option<NodeRef> {
    NodeInner::preorder(root)
        .into_iter()
        .find(|n| n.borrow().element().is_some_and(|e| e.qname().eq_ignore_ascii_case(name)))
}

fn write_document(document: &Document, output_path: Option<PathBuf>) -> io::Result<()> {
    let output: Box<dyn Write> = match output_path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    };
    XmlPrinter::new(output).print_document(document)
}

/// Built-in codec whose encoder also appends every batch to a shared
/// stream.
struct RecordingCodec {
    stream: Rc<RefCell<Vec<u8>>>,
}

impl CodecProvider for RecordingCodec {
    fn encoder(&self, addresses: SourceAddresses) -> Box<dyn EncodeMutations> {
        Box::new(TeeEncoder {
            inner: BuiltinCodec.encoder(addresses),
            stream: self.stream.clone(),
        })
    }

    fn patcher(&self, destination: Document, addresses: DestinationAddresses) -> Box<dyn ApplyPatch> {
        BuiltinCodec.patcher(destination, addresses)
    }

    fn logger(&self) -> Option<Box<dyn MutationLogger>> {
        BuiltinCodec.logger()
    }
}

struct TeeEncoder {
    inner: Box<dyn EncodeMutations>,
    stream: Rc<RefCell<Vec<u8>>>,
}

impl TeeEncoder {
    fn tee(&self, bytes: dom_mirror::Result<Vec<u8>>) -> dom_mirror::Result<Vec<u8>> {
        if let Ok(bytes) = &bytes {
            self.stream.borrow_mut().extend_from_slice(bytes);
        }
        bytes
    }
}

impl EncodeMutations for TeeEncoder {
    fn encode(&mut self, records: &[MutationRecord]) -> dom_mirror::Result<Vec<u8>> {
        let bytes = self.inner.encode(records);
        self.tee(bytes)
    }

    fn encode_value_change(&mut self, control: &NodeRef) -> dom_mirror::Result<Vec<u8>> {
        let bytes = self.inner.encode_value_change(control);
        self.tee(bytes)
    }
}
