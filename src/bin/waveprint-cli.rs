use std::cell::RefCell;
use std::process;
use std::rc::Rc;

use clap::{App, Arg, SubCommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use waveprint::audio::{BufferAudioProvider, FileAudioProvider};
use waveprint::fingerprinting::codebook;
use waveprint::fingerprinting::fingerprinter::Qlf;
use waveprint::store::MemoryStore;
use waveprint::{
    Codebook, Fingerprinter, IdMode, IdOutput, IdType, Indexer, IndexerConfig, MatchType,
    OutputFormat, Recognizer, RecognizerConfig,
};

fn main() {
    let matches = App::new("Waveprint CLI")
        .version(waveprint::VERSION)
        .about("Audio content identification: fingerprint, index and recognize audio snippets")
        .subcommand(
            SubCommand::with_name("fingerprint")
                .about("Extract the fingerprint of an audio file")
                .arg(
                    Arg::with_name("input")
                        .required(true)
                        .help("Input audio file path")
                        .index(1),
                )
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .value_name("FILE")
                        .help("Output fingerprint file (default: <input>.fp)")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("identify")
                .about("Identify a snippet against a set of reference recordings")
                .arg(
                    Arg::with_name("snippet")
                        .required(true)
                        .help("Audio snippet to identify")
                        .index(1),
                )
                .arg(
                    Arg::with_name("references")
                        .required(true)
                        .multiple(true)
                        .help("Reference recordings (audio files or .fp fingerprints)")
                        .index(2),
                )
                .arg(
                    Arg::with_name("format")
                        .short("f")
                        .long("format")
                        .value_name("FORMAT")
                        .help("Output format: simple, json, csv")
                        .takes_value(true)
                        .default_value("simple"),
                )
                .arg(
                    Arg::with_name("match-type")
                        .long("match-type")
                        .value_name("TYPE")
                        .help("Matching algorithm: mscale, xscale")
                        .takes_value(true)
                        .default_value("mscale"),
                )
                .arg(
                    Arg::with_name("id-type")
                        .long("id-type")
                        .value_name("TYPE")
                        .help("Classification: fuzzy, binary")
                        .takes_value(true)
                        .default_value("binary"),
                )
                .arg(
                    Arg::with_name("id-mode")
                        .long("id-mode")
                        .value_name("MODE")
                        .help("Fuzzy classification mode: easy, strict")
                        .takes_value(true)
                        .default_value("easy"),
                )
                .arg(
                    Arg::with_name("threshold")
                        .long("threshold")
                        .value_name("VALUE")
                        .help("Binary identification threshold in [0.5,1]")
                        .takes_value(true)
                        .default_value("0.6"),
                )
                .arg(
                    Arg::with_name("mms")
                        .long("mms")
                        .value_name("VALUE")
                        .help("Re-ranking aggressiveness in [0,1]")
                        .takes_value(true)
                        .default_value("0.5"),
                ),
        )
        .subcommand(
            SubCommand::with_name("make-codes")
                .about("Train an audio codebook from a set of audio files")
                .arg(
                    Arg::with_name("inputs")
                        .required(true)
                        .multiple(true)
                        .help("Training audio files")
                        .index(1),
                )
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .value_name("FILE")
                        .help("Output codebook file")
                        .takes_value(true)
                        .default_value("audio_codes.bin"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("fingerprint", Some(sub)) => {
            let input = sub.value_of("input").unwrap();
            let output = sub
                .value_of("output")
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("{}.fp", input));

            match cmd_fingerprint(input, &output) {
                Ok(n) => println!("{}: {} LFs written to {}", input, n, output),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        ("identify", Some(sub)) => {
            let snippet = sub.value_of("snippet").unwrap();
            let references: Vec<&str> = sub.values_of("references").unwrap().collect();
            let format = match sub.value_of("format").unwrap() {
                "json" => OutputFormat::Json,
                "csv" => OutputFormat::Csv,
                _ => OutputFormat::Simple,
            };
            let match_type = match sub.value_of("match-type").unwrap() {
                "xscale" => MatchType::Xscale,
                _ => MatchType::Mscale,
            };
            let id_type = match sub.value_of("id-type").unwrap() {
                "fuzzy" => IdType::Fuzzy,
                _ => IdType::Binary,
            };
            let id_mode = match sub.value_of("id-mode").unwrap() {
                "strict" => IdMode::Strict,
                _ => IdMode::Easy,
            };
            let threshold: f32 = sub
                .value_of("threshold")
                .unwrap()
                .parse()
                .unwrap_or_else(|_| {
                    eprintln!("Error: invalid threshold");
                    process::exit(1);
                });
            let mms: f32 = sub.value_of("mms").unwrap().parse().unwrap_or_else(|_| {
                eprintln!("Error: invalid mms");
                process::exit(1);
            });

            if format == OutputFormat::Csv {
                println!("{}", IdOutput::csv_header());
            }

            match cmd_identify(
                snippet, &references, match_type, id_type, id_mode, threshold, mms,
            ) {
                Ok(output) => println!("{}", IdOutput::format_matches(&output, format)),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        ("make-codes", Some(sub)) => {
            let inputs: Vec<&str> = sub.values_of("inputs").unwrap().collect();
            let output = sub.value_of("output").unwrap();

            match cmd_make_codes(&inputs, output) {
                Ok(n) => println!("codebook trained on {} descriptors, written to {}", n, output),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        _ => {
            eprintln!("No subcommand given; try --help");
            process::exit(2);
        }
    }
}

/// Fingerprint one audio file into a packed QLF file.
fn cmd_fingerprint(input: &str, output: &str) -> waveprint::Result<usize> {
    let samples = FileAudioProvider::load(input)?;
    let codebook = Codebook::shared()?;

    let mut fingerprinter = Fingerprinter::new();
    let mut qlfs = Vec::new();
    let chunk_size = waveprint::params::FS as usize * 10;

    let chunks: Vec<&[f32]> = samples.chunks(chunk_size).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        fingerprinter.process(chunk, i + 1 == chunks.len());
        for lf in fingerprinter.get() {
            let q = codebook.quantize(&lf.descriptor);
            qlfs.push(Qlf {
                t: lf.t,
                f: lf.f as u16,
                w: q.word,
                e: q.dist,
            });
        }
    }

    if qlfs.is_empty() {
        return Err(waveprint::Error::InvalidFingerprint(format!(
            "no fingerprints extracted from '{}'",
            input
        )));
    }

    std::fs::write(output, Qlf::pack(&qlfs))
        .map_err(|e| waveprint::Error::Audio(format!("couldn't write '{}': {}", output, e)))?;
    Ok(qlfs.len())
}

/// Index the references into an in-memory store, then identify the
/// snippet against them.
fn cmd_identify(
    snippet: &str,
    references: &[&str],
    match_type: MatchType,
    id_type: IdType,
    id_mode: IdMode,
    threshold: f32,
    mms: f32,
) -> waveprint::Result<Vec<waveprint::IdMatch>> {
    let store = Rc::new(RefCell::new(MemoryStore::new()));

    let mut indexer = Indexer::new(
        store.clone(),
        IndexerConfig::new().with_match_type(match_type),
    )?;
    indexer.start()?;
    for (i, reference) in references.iter().enumerate() {
        let fid = i as u32 + 1;
        if reference.ends_with(".fp") {
            let fpdata = std::fs::read(reference).map_err(|e| {
                waveprint::Error::Audio(format!("couldn't read '{}': {}", reference, e))
            })?;
            indexer.index_fingerprint(fid, &fpdata)?;
            // re-ranking needs the raw fingerprints available
            store.borrow_mut().put_fingerprint(fid, &fpdata);
        } else {
            let samples = FileAudioProvider::load(reference)?;
            let mut provider = BufferAudioProvider::new(samples);
            indexer.index(fid, &mut provider)?;
        }
        eprintln!("indexed {} as FID {}", reference, fid);
    }
    indexer.end(true)?;

    let config = RecognizerConfig::new()
        .with_match_type(match_type)
        .with_id_type(id_type)
        .with_id_mode(id_mode)
        .with_binary_id_threshold(threshold)
        .with_mms(mms);
    let mut recognizer = Recognizer::new(store, config)?;

    // feed the snippet in ~1 s chunks, as a live client would
    let samples = FileAudioProvider::load(snippet)?;
    for chunk in samples.chunks(waveprint::params::FS as usize) {
        recognizer.identify(chunk)?;
        if recognizer.results().is_some() {
            break;
        }
    }
    if recognizer.results().is_none() {
        recognizer.flush()?;
    }

    Ok(recognizer.results().unwrap_or(&[]).to_vec())
}

/// Train a codebook from the descriptors of the given audio files.
fn cmd_make_codes(inputs: &[&str], output: &str) -> waveprint::Result<usize> {
    let mut descriptors: Vec<Vec<u8>> = Vec::new();
    let mut fingerprinter = Fingerprinter::new();

    for input in inputs {
        let samples = FileAudioProvider::load(input)?;
        fingerprinter.reset();
        let chunks: Vec<&[f32]> = samples.chunks(waveprint::params::FS as usize * 10).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            fingerprinter.process(chunk, i + 1 == chunks.len());
            descriptors.extend(fingerprinter.get().iter().map(|lf| lf.descriptor.clone()));
        }
        eprintln!("{}: {} descriptors", input, descriptors.len());
    }

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let cb = codebook::train(&descriptors, waveprint::params::KMED, 50, &mut rng)?;
    cb.save(output)?;
    Ok(descriptors.len())
}
