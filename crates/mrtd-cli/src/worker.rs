//! Background worker for document operations

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use mrtd_card::{CardReader, IdDocument, MrtdReader, MrzKey, ReadConfig, UnverifiedSod};
use tracing::{debug, info, warn};

/// Messages sent from the document worker to the caller
#[derive(Debug)]
pub enum DocumentEvent {
    /// A document was detected on the reader
    DocumentDetected { reader_name: String },
    /// The document was removed
    DocumentRemoved,
    /// Authentication and reading started
    ReadingStarted,
    /// The document was successfully read
    DocumentReady(Box<IdDocument>),
    /// Error occurred
    Error { message: String },
    /// Reader is unavailable
    ReaderUnavailable { error: String },
    /// Reader became available
    ReaderAvailable,
}

/// Commands sent from the caller to the worker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Stop the worker thread
    Stop,
}

/// Background worker polling the reader for documents
pub struct DocumentWorker {
    mrz: MrzKey,
    config: ReadConfig,
    event_tx: Sender<DocumentEvent>,
    command_rx: Receiver<WorkerCommand>,
}

impl DocumentWorker {
    /// Spawn a new document worker thread
    pub fn spawn(mrz: MrzKey, config: ReadConfig) -> (Receiver<DocumentEvent>, Sender<WorkerCommand>) {
        let (event_tx, event_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();

        thread::spawn(move || {
            let worker = DocumentWorker {
                mrz,
                config,
                event_tx,
                command_rx,
            };
            worker.run();
        });

        (event_rx, command_tx)
    }

    fn run(self) {
        info!("Document worker thread started");

        let mut reader: Option<CardReader> = None;
        let mut document_present = false;
        let mut last_reader_check = std::time::Instant::now();
        let mut first_check = true;

        loop {
            // Check for stop command (non-blocking)
            if let Ok(WorkerCommand::Stop) = self.command_rx.try_recv() {
                info!("Document worker stopping");
                break;
            }

            // Try to get reader if we don't have one (check every 2 seconds)
            if reader.is_none() && (first_check || last_reader_check.elapsed() >= Duration::from_secs(2)) {
                first_check = false;
                match CardReader::new() {
                    Ok(r) => {
                        info!("Card reader initialized");
                        reader = Some(r);
                        let _ = self.event_tx.send(DocumentEvent::ReaderAvailable);
                    }
                    Err(e) => {
                        debug!("Card reader unavailable: {}", e);
                        let _ = self.event_tx.send(DocumentEvent::ReaderUnavailable {
                            error: format!("{}", e),
                        });
                    }
                }
                last_reader_check = std::time::Instant::now();
            }

            // Check for a document if we have a reader
            if let Some(ref r) = reader {
                match r.connect_first() {
                    Ok((chip, reader_name)) => {
                        if !document_present {
                            info!(reader = %reader_name, "Document detected");
                            document_present = true;
                            let _ = self.event_tx.send(DocumentEvent::DocumentDetected {
                                reader_name: reader_name.clone(),
                            });
                            let _ = self.event_tx.send(DocumentEvent::ReadingStarted);

                            let mut mrtd = MrtdReader::new(chip);
                            let validator = self.config.csca_path.as_ref().map(|_| UnverifiedSod);
                            match mrtd.read_document(
                                &self.mrz,
                                &self.config,
                                validator
                                    .as_ref()
                                    .map(|v| v as &dyn mrtd_card::SodValidator),
                            ) {
                                Ok(document) => {
                                    let _ = self
                                        .event_tx
                                        .send(DocumentEvent::DocumentReady(Box::new(document)));
                                }
                                Err(e) => {
                                    warn!(error = %e, "Failed to read document");
                                    let _ = self.event_tx.send(DocumentEvent::Error {
                                        message: format!("Failed to read document: {}", e),
                                    });
                                }
                            }
                        }
                    }
                    Err(_) => {
                        if document_present {
                            info!("Document removed");
                            document_present = false;
                            let _ = self.event_tx.send(DocumentEvent::DocumentRemoved);
                        }
                    }
                }
            }

            // Sleep briefly to avoid busy loop
            thread::sleep(Duration::from_millis(250));
        }

        info!("Document worker thread stopped");
    }
}
