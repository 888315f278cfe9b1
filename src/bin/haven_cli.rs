//! A thin smoke-test front-end over the `haven` engine: builds an
//! in-memory database with one demo collection and runs a scripted
//! create/find/update/delete sequence, printing each step as JSON.

use clap::{Parser, Subcommand};
use haven::{
    CollectionDescriptor, CollectionHandle, Database, DatabaseConfig, FieldSchema, FieldType, QuerySpec,
    UniqueConstraint,
};

#[derive(Parser)]
#[command(name = "haven-cli", version, about = "Smoke-test front-end for the haven embedded document database")]
struct Cli {
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scripted create/find/update/delete sequence against an
    /// in-memory "notes" collection and print each step's result.
    Demo,
    /// Print the crate version.
    Version,
}

fn notes_descriptor() -> CollectionDescriptor {
    let mut schema = haven::CollectionSchema::new();
    schema.insert("title".into(), FieldSchema::required(FieldType::String));
    schema.insert("body".into(), FieldSchema::optional(FieldType::String));
    schema.insert("pinned".into(), FieldSchema::required(FieldType::Boolean).with_default(haven::QueryValue::Bool(false)));

    let mut descriptor = CollectionDescriptor::new("notes", schema);
    descriptor.unique_fields.push(UniqueConstraint::single("title"));
    descriptor
}

async fn run_demo() -> haven::DbResult<()> {
    let config = DatabaseConfig::new().with_collection(notes_descriptor());
    let db = Database::build(config).await?;
    let notes = CollectionHandle::new(db, "notes");

    let mut create_data = haven::FieldMap::new();
    create_data.insert("title".into(), haven::QueryValue::Text("Groceries".into()));
    create_data.insert("body".into(), haven::QueryValue::Text("Milk, eggs, bread".into()));
    let created = notes.create(create_data).await?;
    println!("created: {}", haven::QueryValue::Record(created.clone()).to_json());

    let id = created.get("id").and_then(|v| v.as_text()).unwrap_or_default().to_string();

    let found = notes.find(&QuerySpec::new())?;
    println!("found {} note(s)", found.len());

    let mut patch = haven::FieldMap::new();
    patch.insert("pinned".into(), haven::QueryValue::Bool(true));
    let updated = notes.update(&id, patch).await?;
    println!("updated: {}", haven::QueryValue::Record(updated).to_json());

    let deleted = notes.delete(&id, false).await?;
    println!("deleted: {}", haven::QueryValue::Record(deleted).to_json());

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(filter).unwrap())
        .init();

    let result = match cli.command.unwrap_or(Command::Demo) {
        Command::Demo => run_demo().await,
        Command::Version => {
            println!("haven {}", haven::VERSION);
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
