use clap::Parser;
use dotenvy::dotenv;
use gatehouse::cli::{Cli, Commands, issue_token};
use gatehouse::server::serve;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(&config).await,
        Commands::IssueToken { config, sub, name, role } => {
            let token = issue_token(&config, sub, &name, &role).await?;
            println!("{token}");
            Ok(())
        }
    }
}
