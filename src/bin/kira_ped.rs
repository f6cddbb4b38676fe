use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_pedigree::app::{
    App, InfoResult, ListResult, ProgressEvent, ProgressSink, ProvisionResult, ValidationReport,
};
use kira_pedigree::config::{CatalogConfig, ConfigLoader};
use kira_pedigree::domain::{Reference, StudyId};
use kira_pedigree::error::PedigreeError;
use kira_pedigree::output::{JsonOutput, LogSink, OutputMode};
use kira_pedigree::pedigree::MemberAction;
use kira_pedigree::store::FsEntityStore;
use kira_pedigree::submission::SubmissionLoader;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Parser)]
#[command(name = "kira-ped")]
#[command(about = "Validate family pedigrees and provision their individuals in dependency order")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Config file (defaults to ./kira-pedigree.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Store root, overriding the config file
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Validate or provision a family submission")]
    Family(FamilyArgs),
    #[command(about = "Inspect stored individuals")]
    Individual(IndividualArgs),
}

#[derive(Args)]
struct FamilyArgs {
    #[command(subcommand)]
    command: FamilyCommand,
}

#[derive(Subcommand)]
enum FamilyCommand {
    #[command(about = "Check a submission without writing anything")]
    Validate(SubmissionArgs),
    #[command(about = "Check a submission and create its individuals")]
    Provision(SubmissionArgs),
}

#[derive(Args)]
struct SubmissionArgs {
    file: PathBuf,

    #[arg(long)]
    study: String,
}

#[derive(Args)]
struct IndividualArgs {
    #[command(subcommand)]
    command: IndividualCommand,
}

#[derive(Subcommand)]
enum IndividualCommand {
    #[command(about = "Show one individual by id or name")]
    Info(InfoArgs),
    #[command(about = "List the individuals of a study")]
    List(ListArgs),
}

#[derive(Args)]
struct InfoArgs {
    reference: String,

    #[arg(long)]
    study: String,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    study: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PedigreeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PedigreeError) -> u8 {
    match error {
        PedigreeError::Validation(_)
        | PedigreeError::MissingMember(_)
        | PedigreeError::IndividualNotFound(_) => 2,
        PedigreeError::Provisioning(_)
        | PedigreeError::Store(_)
        | PedigreeError::Filesystem(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(store) = cli.store {
        config.store_root = Utf8PathBuf::from(store);
    }
    let store = FsEntityStore::new(&config);
    let app = App::new(store, config);

    match cli.command {
        Commands::Family(args) => run_family(args.command, &app, output_mode),
        Commands::Individual(args) => run_individual(args.command, &app, output_mode),
    }
}

fn run_family(
    command: FamilyCommand,
    app: &App<FsEntityStore>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let (args, provision) = match command {
        FamilyCommand::Validate(args) => (args, false),
        FamilyCommand::Provision(args) => (args, true),
    };
    let study: StudyId = args.study.parse()?;
    let family = SubmissionLoader::load(&args.file, app.config().offset)?;

    let outcome = match (provision, output_mode) {
        (false, OutputMode::NonInteractive) => app
            .validate_family(&study, &family, &LogSink)
            .and_then(|report| JsonOutput::print_validation(&report).map_err(io_error)),
        (false, OutputMode::Interactive) => app
            .validate_family(&study, &family, &ConsoleSink)
            .map(|report| print_validation_summary(&report)),
        (true, OutputMode::NonInteractive) => app
            .provision_family(&study, family, &LogSink)
            .and_then(|result| JsonOutput::print_provision(&result).map_err(io_error)),
        (true, OutputMode::Interactive) => app
            .provision_family(&study, family, &ConsoleSink)
            .map(|result| print_provision_summary(&result)),
    };

    if let Err(error) = &outcome {
        if matches!(output_mode, OutputMode::NonInteractive) {
            JsonOutput::print_failure(error).into_diagnostic()?;
        } else if let PedigreeError::Provisioning(partial) = error {
            print_partial_summary(&partial.completed);
        }
    }
    Ok(outcome?)
}

fn run_individual(
    command: IndividualCommand,
    app: &App<FsEntityStore>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        IndividualCommand::Info(args) => {
            let study: StudyId = args.study.parse()?;
            let reference = Reference::parse(&args.reference, app.config().offset);
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.individual_info(&study, &reference, &LogSink)?;
                    JsonOutput::print_info(&result).into_diagnostic()?;
                }
                OutputMode::Interactive => {
                    let result = app.individual_info(&study, &reference, &ConsoleSink)?;
                    print_info_summary(&result);
                }
            }
            Ok(())
        }
        IndividualCommand::List(args) => {
            let study: StudyId = args.study.parse()?;
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.list_individuals(&study, &LogSink)?;
                    JsonOutput::print_list(&result).into_diagnostic()?;
                }
                OutputMode::Interactive => {
                    let result = app.list_individuals(&study, &ConsoleSink)?;
                    print_list_summary(&result, app.config());
                }
            }
            Ok(())
        }
    }
}

fn io_error(err: std::io::Error) -> PedigreeError {
    PedigreeError::Filesystem(err.to_string())
}

/// Progress lines for interactive runs.
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{CYAN}• {} ({elapsed:.2?}){RESET}", event.message),
            None => eprintln!("{CYAN}• {}{RESET}", event.message),
        }
    }
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("{YELLOW}⚠️ {warning}{RESET}");
    }
}

fn print_validation_summary(report: &ValidationReport) {
    println!("{CYAN}🧬 KIRA-PED validation: {}{RESET}", report.family);
    println!(
        "{GREEN}✅ {} member(s) in {} generation(s){RESET}",
        report.members,
        report.generations.len()
    );
    for (index, level) in report.generations.levels().iter().enumerate() {
        let names: Vec<&str> = level.iter().map(String::as_str).collect();
        println!("{GREEN}   gen {index}: {}{RESET}", names.join(", "));
    }
    for existing in &report.existing {
        println!("{CYAN}♻️ {} already stored as {}{RESET}", existing.name, existing.id);
    }
    print_warnings(&report.warnings);
}

fn print_provision_summary(result: &ProvisionResult) {
    let created = result
        .members
        .iter()
        .filter(|member| member.action == MemberAction::Created)
        .count();
    println!("{CYAN}🧬 KIRA-PED provisioning: {}{RESET}", result.family.name);
    println!(
        "{GREEN}✅ Created: {created}, reused: {}{RESET}",
        result.members.len() - created
    );
    for member in &result.members {
        let (icon, color) = match member.action {
            MemberAction::Created => ("➕", GREEN),
            MemberAction::Reused => ("♻️", CYAN),
        };
        println!(
            "{color}{icon} gen {} {} → {}{RESET}",
            member.generation, member.name, member.id
        );
    }
    print_warnings(&result.warnings);
}

fn print_partial_summary(completed: &[kira_pedigree::pedigree::MemberOutcome]) {
    println!("{RED}❌ Provisioning stopped; already stored:{RESET}");
    for member in completed {
        println!("{RED}   {} → {}{RESET}", member.name, member.id);
    }
}

fn print_info_summary(result: &InfoResult) {
    let individual = &result.individual;
    println!(
        "{CYAN}👤 {} ({}) in {}{RESET}",
        individual.name, individual.id, individual.study
    );
    println!("{GREEN}   sex: {}{RESET}", individual.sex);
    if let Some(father) = individual.father {
        println!("{GREEN}   father: {father}{RESET}");
    }
    if let Some(mother) = individual.mother {
        println!("{GREEN}   mother: {mother}{RESET}");
    }
    if !individual.disease_ids.is_empty() {
        println!("{GREEN}   diseases: {}{RESET}", individual.disease_ids.join(", "));
    }
    if !result.children.is_empty() {
        let children: Vec<String> = result.children.iter().map(ToString::to_string).collect();
        println!("{GREEN}   children: {}{RESET}", children.join(", "));
    }
}

fn print_list_summary(result: &ListResult, config: &CatalogConfig) {
    println!(
        "{CYAN}📁 {} individual(s) in {} ({}){RESET}",
        result.individuals.len(),
        result.study,
        config.store_root
    );
    for individual in &result.individuals {
        println!(
            "{GREEN}• {} {} ({}){RESET}",
            individual.id, individual.name, individual.sex
        );
    }
}
