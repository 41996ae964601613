use std::path::PathBuf;

use clap::Parser;
use mrtd_card::{CardReader, IdDocument, ImageFormat, MrtdReader, MrzKey, ReadConfig, UnverifiedSod};
use mrtd_common::get_tag_name;
use tracing_subscriber::EnvFilter;

mod formatters;
mod worker;

use formatters::FormatMode;
use worker::{DocumentEvent, DocumentWorker, WorkerCommand};

#[derive(Parser)]
#[command(name = "mrtd-reader")]
#[command(about = "Travel Document Reader - Read ICAO 9303 documents from NFC readers")]
#[command(version)]
struct Args {
    /// Document number from the MRZ (up to 9 characters)
    #[arg(short, long)]
    document_number: String,

    /// Date of birth from the MRZ (YYMMDD)
    #[arg(short, long)]
    birth_date: String,

    /// Date of expiry from the MRZ (YYMMDD)
    #[arg(short, long)]
    expiry_date: String,

    /// CSCA trust anchor directory, enables SOD capture
    #[arg(long)]
    csca_dir: Option<PathBuf>,

    /// Authentication attempts per data group
    #[arg(long, default_value_t = 6)]
    attempts: u32,

    /// Skip reading the DG2 face image
    #[arg(long)]
    no_image: bool,

    /// Write the face image to this file
    #[arg(long)]
    image_out: Option<PathBuf>,

    /// Keep polling the reader until a document is read
    #[arg(short, long)]
    watch: bool,

    /// Output format mode
    #[arg(short, long, value_enum, default_value_t = FormatMode::Human)]
    format: FormatMode,
}

fn main() {
    // Initialize tracing subscriber with environment-based filtering
    // Set RUST_LOG=debug for detailed logs, RUST_LOG=trace for very verbose
    // Default: info level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mrz = match MrzKey::new(&args.document_number, &args.birth_date, &args.expiry_date) {
        Ok(mrz) => mrz,
        Err(err) => {
            eprintln!("Invalid MRZ data: {}", err);
            std::process::exit(2);
        }
    };

    let config = ReadConfig {
        max_attempts: args.attempts,
        read_image: !args.no_image,
        csca_path: args.csca_dir.clone(),
        ..ReadConfig::default()
    };

    println!("Travel Document Reader - {} Mode\n", args.format.description());

    let document = if args.watch {
        watch_for_document(mrz, config)
    } else {
        read_once(&mrz, &config)
    };

    let document = match document {
        Some(doc) => doc,
        None => std::process::exit(1),
    };

    print_document(&document, &args.format);

    if let (Some(path), Some(image)) = (&args.image_out, &document.image) {
        match std::fs::write(path, &image.image) {
            Ok(()) => println!("\nFace image written to {}", path.display()),
            Err(err) => eprintln!("\nFailed to write face image: {}", err),
        }
    }
}

/// One-shot read from the first available reader
fn read_once(mrz: &MrzKey, config: &ReadConfig) -> Option<IdDocument> {
    let reader = match CardReader::new() {
        Ok(r) => r,
        Err(err) => {
            eprintln!("Failed to establish PC/SC context: {}", err);
            return None;
        }
    };

    let (chip, reader_name) = match reader.connect_first() {
        Ok((chip, name)) => (chip, name),
        Err(err) => {
            eprintln!("Failed to connect to document: {}", err);
            eprintln!("Please ensure a document is present on the reader");
            return None;
        }
    };
    println!("Reader: {}", reader_name);
    println!("Document connected successfully\n");

    let mut mrtd = MrtdReader::new(chip);
    let validator = config.csca_path.as_ref().map(|_| UnverifiedSod);
    let result = mrtd.read_document(
        mrz,
        config,
        validator
            .as_ref()
            .map(|v| v as &dyn mrtd_card::SodValidator),
    );

    match result {
        Ok(document) => Some(document),
        Err(err) => {
            eprintln!("Failed to read document: {}", err);
            None
        }
    }
}

/// Poll the reader through the background worker until a document is read
fn watch_for_document(mrz: MrzKey, config: ReadConfig) -> Option<IdDocument> {
    println!("Waiting for a document on the reader...\n");
    let (events, commands) = DocumentWorker::spawn(mrz, config);

    for event in events {
        match event {
            DocumentEvent::ReaderAvailable => println!("Card reader available"),
            DocumentEvent::ReaderUnavailable { error } => {
                eprintln!("Card reader unavailable: {}", error);
            }
            DocumentEvent::DocumentDetected { reader_name } => {
                println!("Document detected on {}", reader_name);
            }
            DocumentEvent::ReadingStarted => println!("Authenticating and reading...\n"),
            DocumentEvent::DocumentReady(document) => {
                let _ = commands.send(WorkerCommand::Stop);
                return Some(*document);
            }
            DocumentEvent::Error { message } => eprintln!("{}", message),
            DocumentEvent::DocumentRemoved => println!("Document removed"),
        }
    }

    None
}

fn print_document(document: &IdDocument, mode: &FormatMode) {
    println!("=== Machine Readable Zone (DG1) ===\n");
    println!(
        "  Document Code: {}",
        formatters::format_document_code(&document.document_code, mode)
    );
    println!("  Issuing State: {}", document.issuing_state);
    println!("  Document Number: {}", document.document_number);
    println!("  Surname: {}", document.primary_identifier);
    println!("  Given Names: {}", document.secondary_identifier);
    println!("  Nationality: {}", document.nationality);
    println!(
        "  Date of Birth: {}",
        formatters::format_date(&document.birth_date, mode)
    );
    println!(
        "  Date of Expiry: {}",
        formatters::format_date(&document.expiry_date, mode)
    );
    println!("  Sex: {}", formatters::format_sex(&document.sex, mode));
    if let Some(ref optional) = document.optional_data {
        println!("  Optional Data: {}", optional);
    }

    if *mode == FormatMode::Raw {
        println!("\n  Raw DG1 elements:");
        display_tags(&document.dg1_raw);
    }

    if has_dg11_fields(document) {
        println!("\n=== Additional Details (DG11) ===\n");
        print_optional(document.first_name.as_deref(), "First Name");
        print_optional(document.second_name.as_deref(), "Second Name");
        print_optional(document.third_name.as_deref(), "Third Name");
        print_optional(document.last_name.as_deref(), "Last Name");
        print_optional(document.mothers_first_name.as_deref(), "Mother's First Name");
        print_optional(document.personal_id_number.as_deref(), "Personal ID Number");
        print_optional(document.address.as_deref(), "Address");
        print_optional(document.gender.as_deref(), "Gender");
    }

    if let Some(ref image) = document.image {
        println!("\n=== Face Image (DG2) ===\n");
        println!(
            "  Format: {}",
            match image.format {
                ImageFormat::Jpeg => "JPEG",
                ImageFormat::Jpeg2000 => "JPEG2000",
            }
        );
        println!(
            "  Biometric Type: {}",
            mrtd_card::dg::format_description(&image.format_owner, &image.format_type)
        );
        println!("  Size: {} bytes", image.image.len());
        if *mode == FormatMode::Raw {
            println!(
                "  Data: {} ... ({} bytes total)",
                hex::encode_upper(&image.image[..image.image.len().min(32)]),
                image.image.len()
            );
        }
    }

    if let Some(ref verdict) = document.validity_info {
        println!("\n=== Security Object (EF.SOD) ===\n");
        println!("  {}", verdict);
    }
}

fn print_optional(value: Option<&str>, label: &str) {
    if let Some(value) = value {
        println!("  {}: {}", label, value);
    }
}

fn has_dg11_fields(document: &IdDocument) -> bool {
    document.first_name.is_some()
        || document.last_name.is_some()
        || document.mothers_first_name.is_some()
        || document.personal_id_number.is_some()
        || document.address.is_some()
        || document.gender.is_some()
}

fn display_tags(data: &[u8]) {
    match mrtd_common::tlv::parse(data) {
        Ok(elements) => {
            for element in &elements {
                println!(
                    "  [{}] {}: {}",
                    hex::encode_upper(&element.tag),
                    get_tag_name(&element.tag),
                    hex::encode_upper(&element.value)
                );
            }
        }
        Err(err) => eprintln!("  Failed to parse DG1: {}", err),
    }
}
