use clap::{Arg, Command};
use llama_term::config::Config;
use llama_term::session::SessionController;
use llama_term::terminal::Terminal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("LLAMA_TERM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("llama-term")
        .about("Turn a plain-language goal into a checked, executed shell command")
        .long_about(
            "llama-term asks a language model for a shell command, clarifies the goal when the model \
             needs more detail, checks the command against your distribution, and runs it once you confirm",
        )
        .arg(Arg::new("goal")
            .help("Goal to accomplish; starts the interactive loop when omitted")
            .num_args(1..))
        .arg(Arg::new("host")
            .long("host")
            .help("Model backend host")
            .value_name("HOST")
            .num_args(1))
        .arg(Arg::new("port")
            .long("port")
            .help("Model backend port")
            .value_name("PORT")
            .value_parser(clap::value_parser!(u16))
            .num_args(1))
        .arg(Arg::new("model")
            .long("model")
            .help("Model name to request")
            .value_name("MODEL")
            .num_args(1))
        .arg(Arg::new("config")
            .long("config")
            .help("Show configuration information")
            .action(clap::ArgAction::SetTrue))
        .get_matches();

    let mut config = Config::load()?;
    if let Some(host) = matches.get_one::<String>("host") {
        config.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(model) = matches.get_one::<String>("model") {
        config.model = model.clone();
    }

    if matches.get_flag("config") {
        config.show_config_info()?;
        return Ok(());
    }

    let goal: Vec<String> = matches
        .get_many::<String>("goal")
        .unwrap_or_default()
        .map(|s| s.to_string())
        .collect();

    let mut session = SessionController::new(&config)?;
    let mut terminal = Terminal::stdio()?;

    if goal.is_empty() {
        session.run(&mut terminal).await?;
    } else {
        let goal = goal.join(" ");
        info!("Processing goal: {}", goal);
        let outcome = session.run_goal(&goal, &mut terminal).await?;
        info!("Goal ended: {:?}", outcome);
    }

    Ok(())
}
