//! An offline tool for deriving and checking eligibility commitments.
//! It uses the relayer's own hashing and tree code, so its output matches
//! what the relayer computes and what the ballot contract recomputes.

use std::fs::File;
use std::io::BufReader;

use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;
use serde::Deserialize;

use ballot_relayer::model::{
    accumulator::{Accumulator, Root},
    api::{MerkleProofResponse, MerkleRootResponse},
    election::ElectionId,
    identity::{IdentityKey, IdentityRecord, Leaf, Salt},
};

const PROGRAM_NAME: &str = "proof-cli";

const ABOUT_TEXT: &str = "Derive leaves and nullifiers, and build or check eligibility proofs.

EXIT CODES:
     0: Success.
   255: Ran successfully, but verification failed.
 Other: Error.";

const IDENTITY_KEY: &str = "IDENTITY_KEY";
const SALT: &str = "SALT";
const ELECTION_ID: &str = "ELECTION_ID";
const LEAVES_PATH: &str = "LEAVES_PATH";
const LEAF: &str = "LEAF";
const ROOT: &str = "root";

const LEAVES_PATH_HELP: &str = "The path to the eligibility set, either as returned by\n\
the registry's `GET /leaves` or as a bare JSON array of hex leaves";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    let identity_key = Arg::new(IDENTITY_KEY)
        .help("The voter's identity key")
        .action(ArgAction::Set)
        .required(true);
    let salt = Arg::new(SALT)
        .help("The salt the registry issued, in hex")
        .action(ArgAction::Set)
        .required(true);
    let leaves = Arg::new(LEAVES_PATH)
        .help(LEAVES_PATH_HELP)
        .action(ArgAction::Set)
        .required(true);
    let leaf = Arg::new(LEAF)
        .help("The leaf to prove, in hex")
        .action(ArgAction::Set)
        .required(true);

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .subcommand(
            Command::new("leaf")
                .about("Derive a voter's leaf")
                .arg(identity_key.clone())
                .arg(salt.clone()),
        )
        .subcommand(
            Command::new("nullifier")
                .about("Derive a voter's nullifier for an election")
                .arg(
                    Arg::new(ELECTION_ID)
                        .help("The ledger's election id")
                        .action(ArgAction::Set)
                        .value_parser(clap::value_parser!(u64))
                        .required(true),
                )
                .arg(identity_key)
                .arg(salt),
        )
        .subcommand(
            Command::new("root")
                .about("Compute the root of an eligibility set")
                .arg(leaves.clone()),
        )
        .subcommand(
            Command::new("prove")
                .about("Print the inclusion proof for a leaf as JSON")
                .arg(leaves.clone())
                .arg(leaf.clone()),
        )
        .subcommand(
            Command::new("verify")
                .about("Check that a leaf is a member, optionally under an expected root")
                .arg(leaves)
                .arg(leaf)
                .arg(
                    Arg::new(ROOT)
                        .long(ROOT)
                        .help("The root the proof must verify against, e.g. the ledger's")
                        .action(ArgAction::Set),
                ),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Bad input, in a file or on the command line.
    Format(String),
    /// Verification failed for the contained reason.
    Verification(String),
}

impl From<ballot_relayer::error::Error> for Error {
    fn from(err: ballot_relayer::error::Error) -> Self {
        Self::Format(err.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LeavesFile {
    Registry { leaves: Vec<Leaf> },
    Bare(Vec<Leaf>),
}

fn load_accumulator(path: &str) -> Result<Accumulator, Error> {
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let leaves = match serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))? {
        LeavesFile::Registry { leaves } | LeavesFile::Bare(leaves) => leaves,
    };
    Ok(Accumulator::build(leaves)?)
}

fn identity(args: &ArgMatches) -> Result<IdentityRecord, Error> {
    // Required arguments are guaranteed to be present.
    let key: &String = args.get_one(IDENTITY_KEY).unwrap();
    let salt: &String = args.get_one(SALT).unwrap();
    Ok(IdentityRecord::new(
        IdentityKey::new(key.as_str())?,
        Salt::from_hex(salt)?,
    ))
}

fn prove(args: &ArgMatches) -> Result<MerkleProofResponse, Error> {
    let accumulator = load_accumulator(args.get_one::<String>(LEAVES_PATH).unwrap())?;
    let leaf: Leaf = args.get_one::<String>(LEAF).unwrap().parse()?;
    let proof = accumulator
        .proof(&leaf)
        .ok_or_else(|| Error::Verification(format!("{leaf} is not in the eligibility set")))?;
    Ok(MerkleProofResponse {
        leaf,
        root: accumulator.root(),
        proof,
    })
}

fn verify(args: &ArgMatches) -> Result<Root, Error> {
    let proven = prove(args)?;
    let root = match args.get_one::<String>(ROOT) {
        Some(root) => root.parse::<Root>()?,
        None => proven.root,
    };
    if !proven.proof.verify(&proven.leaf, &root) {
        return Err(Error::Verification(format!(
            "{} does not prove membership under root {root} (the set's root is {})",
            proven.leaf, proven.root
        )));
    }
    Ok(root)
}

/// Execute the chosen subcommand, returning what to print.
fn execute(args: &ArgMatches) -> Result<String, Error> {
    match args.subcommand() {
        Some(("leaf", sub)) => Ok(identity(sub)?.leaf().to_string()),
        Some(("nullifier", sub)) => {
            let election = ElectionId(*sub.get_one::<u64>(ELECTION_ID).unwrap());
            Ok(identity(sub)?.nullifier(election).digest().to_string())
        }
        Some(("root", sub)) => {
            let accumulator = load_accumulator(sub.get_one::<String>(LEAVES_PATH).unwrap())?;
            let response = MerkleRootResponse {
                root: accumulator.root(),
                count: accumulator.len(),
            };
            serde_json::to_string_pretty(&response).map_err(|e| Error::Format(e.to_string()))
        }
        Some(("prove", sub)) => serde_json::to_string_pretty(&prove(sub)?)
            .map_err(|e| Error::Format(e.to_string())),
        Some(("verify", sub)) => {
            verify(sub).map(|root| format!("Verification succeeded under root {root}."))
        }
        // Subcommands are required and all handled above.
        _ => Err(Error::Format("unknown subcommand".to_string())),
    }
}

/// Run the command, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    match execute(args) {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {msg}");
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid input: {msg}");
            1
        }
        Err(Error::Verification(msg)) => {
            println!("Verification failed: {msg}");
            255
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
