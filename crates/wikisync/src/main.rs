use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wikisync_core::ai::{AiAction, GeminiClient, TextTransform};
use wikisync_core::config::{
    ConnectionConfig, ConnectionPatch, SettingsFile, load_settings, patch_connection,
    resolve_settings_path,
};
use wikisync_core::gitlab::{GitLabClient, WikiApi, api_url, list_url};
use wikisync_core::session::{EditorSession, SaveOutcome};

#[derive(Debug, Parser)]
#[command(
    name = "wikisync",
    version,
    about = "Edit GitLab project wiki pages from the command line"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Log requests to stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Config(ConfigArgs),
    #[command(about = "Print the request URL for the wiki or one page")]
    Url(UrlArgs),
    #[command(about = "List wiki pages (titles only)")]
    List(ListArgs),
    #[command(about = "Print one wiki page")]
    Show(ShowArgs),
    #[command(about = "Create or update a wiki page from a markdown file")]
    Push(PushArgs),
    Delete(DeleteArgs),
    #[command(about = "Rewrite text with the AI assistant")]
    Ai(AiArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConfigSubcommand {
    Show,
    Set(ConfigSetArgs),
    Check,
}

#[derive(Debug, Args)]
struct ConfigSetArgs {
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
    #[arg(long, value_name = "ID")]
    project_id: Option<String>,
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,
    #[arg(long, value_name = "URL", help = "Relay address, e.g. http://localhost:8080/")]
    relay_url: Option<String>,
    #[arg(long, conflicts_with = "no_relay", help = "Route requests through the relay")]
    use_relay: bool,
    #[arg(long, help = "Talk to GitLab directly")]
    no_relay: bool,
}

#[derive(Debug, Args)]
struct UrlArgs {
    slug: Option<String>,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, help = "Print JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ShowArgs {
    slug: String,
    #[arg(short, long, value_name = "FILE", help = "Write the page body to FILE")]
    output: Option<PathBuf>,
    #[arg(long, help = "Print the full page as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct PushArgs {
    file: PathBuf,
    #[arg(long, help = "Existing page to update; omit to create a new page")]
    slug: Option<String>,
    #[arg(long)]
    title: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    slug: String,
}

#[derive(Debug, Args)]
struct AiArgs {
    #[arg(help = "fix-grammar | summarize | expand | translate-en | translate-zh")]
    action: String,
    #[arg(short, long, value_name = "FILE", help = "Read text from FILE instead of stdin")]
    file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);

    let cwd = env::current_dir().context("failed to read current directory")?;
    let settings_path = resolve_settings_path(cli.config.as_deref(), &cwd);

    match cli.command {
        Some(Commands::Config(ConfigArgs { command })) => match command {
            ConfigSubcommand::Show => run_config_show(&settings_path),
            ConfigSubcommand::Set(args) => run_config_set(&settings_path, args),
            ConfigSubcommand::Check => run_config_check(&settings_path),
        },
        Some(Commands::Url(args)) => run_url(&settings_path, args),
        Some(Commands::List(args)) => run_list(&settings_path, args),
        Some(Commands::Show(args)) => run_show(&settings_path, args),
        Some(Commands::Push(args)) => run_push(&settings_path, args),
        Some(Commands::Delete(args)) => run_delete(&settings_path, args),
        Some(Commands::Ai(args)) => run_ai(&settings_path, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("WIKISYNC_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("wikisync={level},wikisync_core={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

fn load_connection(settings_path: &Path) -> Result<(SettingsFile, ConnectionConfig)> {
    let settings = load_settings(settings_path)?;
    let connection = settings.connection.clone().with_env_overrides();
    Ok((settings, connection))
}

fn run_config_show(settings_path: &Path) -> Result<()> {
    let (settings, connection) = load_connection(settings_path)?;
    println!(
        "settings: {} ({})",
        normalize_path(settings_path),
        if settings_path.exists() {
            "found"
        } else {
            "missing"
        }
    );
    println!("base_url: {}", connection.base_url);
    println!("project_id: {}", connection.project_id);
    println!("token: {}", connection.redacted_token());
    println!("use_relay: {}", format_flag(connection.use_relay));
    println!(
        "relay_url: {}",
        connection.relay_url.as_deref().unwrap_or("(not set)")
    );
    println!("ai_model: {}", settings.ai.model());
    println!("request_url: {}", api_url(&connection, None));
    let missing = connection.missing_fields();
    if !missing.is_empty() {
        println!("missing: {}", missing.join(", "));
    }
    Ok(())
}

fn run_config_set(settings_path: &Path, args: ConfigSetArgs) -> Result<()> {
    let use_relay = if args.use_relay {
        Some(true)
    } else if args.no_relay {
        Some(false)
    } else {
        None
    };
    let patch = ConnectionPatch {
        base_url: args.base_url,
        project_id: args.project_id,
        token: args.token,
        relay_url: args.relay_url,
        use_relay,
    };
    if patch.is_empty() {
        bail!("nothing to set; pass at least one of --base-url, --project-id, --token, --relay-url, --use-relay, --no-relay");
    }
    if patch_connection(settings_path, &patch)? {
        println!("updated {}", normalize_path(settings_path));
    } else {
        println!("no changes to {}", normalize_path(settings_path));
    }
    Ok(())
}

fn run_config_check(settings_path: &Path) -> Result<()> {
    let (_, connection) = load_connection(settings_path)?;
    connection.ensure_complete()?;
    if connection.use_relay && connection.active_relay().is_none() {
        println!("warning: use_relay is set but relay_url is empty; requests go direct");
    }
    println!("connection ok: {}", api_url(&connection, None));
    Ok(())
}

fn run_url(settings_path: &Path, args: UrlArgs) -> Result<()> {
    let (_, connection) = load_connection(settings_path)?;
    match args.slug {
        Some(slug) => println!("{}", api_url(&connection, Some(&slug))),
        None => println!("{}", list_url(&connection)),
    }
    Ok(())
}

fn run_list(settings_path: &Path, args: ListArgs) -> Result<()> {
    let (_, connection) = load_connection(settings_path)?;
    if !connection.is_configured() {
        eprintln!("connection not configured; run `wikisync config set --project-id <ID> --token <TOKEN>`");
    }
    let mut client = GitLabClient::from_env()?;
    let pages = client
        .list_pages(&connection)
        .context("Failed to load page list. Check configuration.")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&pages)?);
        return Ok(());
    }
    for page in &pages {
        println!("{}\t{}\t{}", page.slug, page.title, page.format);
    }
    println!("pages: {}", pages.len());
    Ok(())
}

fn run_show(settings_path: &Path, args: ShowArgs) -> Result<()> {
    let (_, connection) = load_connection(settings_path)?;
    connection.ensure_complete()?;
    let mut client = GitLabClient::from_env()?;
    let page = client
        .get_page(&connection, &args.slug)
        .with_context(|| format!("Could not load page content for {}", args.slug))?;

    if let Some(output) = &args.output {
        fs::write(output, &page.content)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("wrote {} ({})", normalize_path(output), page.title);
    } else if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        println!("# {}", page.title);
        println!();
        print!("{}", page.content);
        if !page.content.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

fn run_push(settings_path: &Path, args: PushArgs) -> Result<()> {
    let (_, connection) = load_connection(settings_path)?;
    connection.ensure_complete()?;
    let body = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let mut client = GitLabClient::from_env()?;
    let mut session = EditorSession::new();
    session
        .load_pages(&mut client, &connection)
        .context("Failed to load page list. Check configuration.")?;

    match &args.slug {
        Some(slug) => {
            session
                .select_page(&mut client, &connection, slug)
                .with_context(|| {
                    format!("Could not load page content for {slug} (omit --slug to create a page)")
                })?;
        }
        None => {
            session.new_page();
            session.set_title(title_from_path(&args.file));
        }
    }
    if let Some(title) = &args.title {
        session.set_title(title.clone());
    }
    session.set_body(body);

    if !session.is_new() && !session.is_dirty() {
        println!(
            "unchanged: {}",
            session.active_slug().unwrap_or_default()
        );
        return Ok(());
    }

    let outcome = session
        .save(&mut client, &connection)
        .context("Failed to save changes to GitLab.")?;
    let summary = outcome.summary();
    let action = match outcome {
        SaveOutcome::Created(_) => "created",
        SaveOutcome::Updated(_) => "updated",
    };
    println!("{action}: {} ({})", summary.slug, summary.title);
    if let Some(notice) = session.status() {
        println!("{}", notice.text);
    }
    Ok(())
}

fn run_delete(settings_path: &Path, args: DeleteArgs) -> Result<()> {
    let (_, connection) = load_connection(settings_path)?;
    connection.ensure_complete()?;
    let mut client = GitLabClient::from_env()?;
    let mut session = EditorSession::new();
    session
        .load_pages(&mut client, &connection)
        .context("Failed to load page list. Check configuration.")?;
    if !session.contains(&args.slug) {
        bail!("no wiki page with slug {}", args.slug);
    }
    session
        .delete_page(&mut client, &connection, &args.slug)
        .with_context(|| format!("Failed to delete page from GitLab: {}", args.slug))?;
    println!("deleted: {}", args.slug);
    Ok(())
}

fn run_ai(settings_path: &Path, args: AiArgs) -> Result<()> {
    let (settings, _) = load_connection(settings_path)?;
    let action = AiAction::parse(&args.action).map_err(anyhow::Error::msg)?;
    let text = match &args.file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };

    let client = GeminiClient::from_env(&settings.ai.model())?;
    let output = client.transform(&text, action)?;
    print!("{output}");
    if !output.is_empty() && !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace(['-', '_'], " "))
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or_else(|| wikisync_core::session::NEW_PAGE_TITLE.to_string())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn push_title_defaults_to_file_stem() {
        assert_eq!(title_from_path(Path::new("docs/release_notes.md")), "release notes");
        assert_eq!(title_from_path(Path::new("Getting-Started.md")), "Getting Started");
    }

    #[test]
    fn relay_flags_conflict() {
        let parsed = Cli::try_parse_from(["wikisync", "config", "set", "--use-relay", "--no-relay"]);
        assert!(parsed.is_err());
    }
}
