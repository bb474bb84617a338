use std::io::{self, Write};

use clap::{Parser, Subcommand};

use mailkick_server::config::MailkickConfig;
use mailkick_server::links::LinkBuilder;
use mailkick_server::models::DEFAULT_LIST;
use mailkick_server::token::{SigningKey, TokenCodec};

#[derive(Parser, Debug)]
#[command(
    name = "mailkick_token",
    about = "Generate and inspect Mailkick opt-out tokens"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh random signing key as hex, suitable for MAILKICK_SECRET_TOKEN.
    Keygen,

    /// Sign a token and print it with the matching links.
    Generate {
        /// Subscriber email address.
        #[arg(long)]
        email: String,

        #[arg(long)]
        company_id: i64,

        #[arg(long, default_value = DEFAULT_LIST)]
        list: String,
    },

    /// Verify a token and print the subscription it names.
    Verify {
        token: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    if let Command::Keygen = args.command {
        writeln!(io::stdout(), "{}", SigningKey::random().to_hex())?;
        return Ok(());
    }

    let config = MailkickConfig::from_env()?;
    let codec = TokenCodec::new(config.signing_key.clone());

    match args.command {
        Command::Keygen => {}
        Command::Generate {
            email,
            company_id,
            list,
        } => {
            let token = codec.generate(&email, company_id, &list)?;
            let links = LinkBuilder::new(
                codec,
                config.base_url.clone(),
                config.mount_path.clone(),
                config.headers,
            );

            let mut stdout = io::stdout();
            writeln!(stdout, "token:       {token}")?;
            writeln!(stdout, "status:      {}", links.opt_out_url(&email, company_id, &list)?)?;
            writeln!(stdout, "unsubscribe: {}", links.unsubscribe_url(&email, company_id, &list)?)?;
            writeln!(stdout, "subscribe:   {}", links.subscribe_url(&email, company_id, &list)?)?;
        }
        Command::Verify { token } => match codec.verify(token.trim()) {
            Ok(claims) => {
                let mut stdout = io::stdout();
                writeln!(stdout, "email:      {}", claims.email)?;
                writeln!(stdout, "company_id: {}", claims.company_id)?;
                writeln!(stdout, "list:       {}", claims.list)?;
            }
            Err(err) => {
                writeln!(io::stderr(), "error: {err}")?;
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
