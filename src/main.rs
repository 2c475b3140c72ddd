use std::{error::Error, process, sync::Arc};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

use jukebot::{
    commands::{Controller, Reply, SEEK_STEP},
    config::Config,
    console::{ConsoleChannel, Simulator},
    context::{Context, GuildId, UserId, VoiceChannel},
    events::Event,
    http,
    media::YtDlp,
    player::Player,
    playlist::JsonFileStore,
    resolver::Resolver,
    signal,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// All settings have defaults, so the file is optional.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<String>,

    /// Guild to run the console session as
    #[arg(short, long, default_value_t = 1)]
    guild: u64,

    /// User to issue commands as; playlists are saved per user.
    #[arg(short, long, default_value_t = 1)]
    user: u64,

    /// Text channel the console pretends to be
    #[arg(long, default_value_t = String::from("music"))]
    channel: String,

    /// Voice channel the console user is in
    #[arg(long, default_value_t = String::from("General"))]
    voice: String,

    /// Only accept commands from this text channel
    ///
    /// Overrides the configuration file.
    #[arg(long, value_name = "NAME")]
    allowed_channel: Option<String>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("jukebot", level);
    }

    logger.init();
}

/// A line typed at the console.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
    Play(String),
    Join,
    Skip,
    Stop,
    Seek(i64),
    Loop,
    Status,
    PlaylistCreate(String),
    PlaylistDelete(String),
    PlaylistAdd(String, String),
    PlaylistList,
    PlaylistPlay(String),
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  play <query>                  play or queue a song, link or playlist link
  join                          join (or move to) the voice channel
  skip | stop | loop | status
  seek [±seconds]               move playback, 10 seconds ahead by default
  playlist create <name>
  playlist delete <name>
  playlist add <name> <query>
  playlist list
  playlist play <name>
  quit";

fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let required = |what: &str| {
        if rest.is_empty() {
            Err(format!("{verb}: missing {what}"))
        } else {
            Ok(rest.to_owned())
        }
    };

    match verb {
        "play" | "p" => required("query").map(Command::Play),
        "join" => Ok(Command::Join),
        "skip" | "next" => Ok(Command::Skip),
        "stop" => Ok(Command::Stop),
        "seek" if rest.is_empty() => Ok(Command::Seek(SEEK_STEP)),
        "seek" => rest
            .trim_start_matches('+')
            .parse()
            .map(Command::Seek)
            .map_err(|e| format!("seek: {e}")),
        "loop" => Ok(Command::Loop),
        "status" | "queue" => Ok(Command::Status),
        "playlist" => parse_playlist(rest),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command {other:?}, try \"help\"")),
    }
}

fn parse_playlist(args: &str) -> Result<Command, String> {
    let (action, rest) = args.split_once(' ').unwrap_or((args, ""));
    let rest = rest.trim();
    let name = || {
        if rest.is_empty() {
            Err(format!("playlist {action}: missing name"))
        } else {
            Ok(rest.to_owned())
        }
    };

    match action {
        "create" => name().map(Command::PlaylistCreate),
        "delete" => name().map(Command::PlaylistDelete),
        "add" => match rest.split_once(' ') {
            Some((name, query)) if !query.trim().is_empty() => Ok(Command::PlaylistAdd(
                name.to_owned(),
                query.trim().to_owned(),
            )),
            _ => Err("playlist add: usage is \"playlist add <name> <query>\"".to_owned()),
        },
        "list" => Ok(Command::PlaylistList),
        "play" => name().map(Command::PlaylistPlay),
        other => Err(format!("unknown playlist action {other:?}")),
    }
}

async fn execute(
    controller: &Controller,
    ctx: &Context,
    command: Command,
) -> jukebot::error::Result<Option<Reply>> {
    let reply = match command {
        Command::Play(query) => controller.play(ctx, &query).await?,
        Command::Join => controller.join(ctx).await?,
        Command::Skip => controller.skip(ctx).await?,
        Command::Stop => controller.stop(ctx).await?,
        Command::Seek(delta) => controller.seek(ctx, delta).await?,
        Command::Loop => controller.toggle_loop(ctx).await?,
        Command::Status => controller.status(ctx).await?,
        Command::PlaylistCreate(name) => controller.playlist_create(ctx, &name).await?,
        Command::PlaylistDelete(name) => controller.playlist_delete(ctx, &name).await?,
        Command::PlaylistAdd(name, query) => controller.playlist_add(ctx, &name, &query).await?,
        Command::PlaylistList => controller.playlist_list(ctx).await?,
        Command::PlaylistPlay(name) => controller.playlist_play(ctx, &name).await?,
        Command::Help | Command::Quit => return Ok(None),
    };
    Ok(Some(reply))
}

fn log_event(event: Event) {
    match event {
        Event::Failed(guild) => info!("{guild}: a track failed to start"),
        Event::Ended(guild, status) => debug!("{guild}: track ended ({status})"),
        other => debug!("{other:?}"),
    }
}

/// Main application loop.
///
/// Reads commands from stdin until `quit`, end of input or a shutdown
/// signal, then stops the playback loop gracefully.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if args.allowed_channel.is_some() {
        config.allowed_channel = args.allowed_channel.clone();
    }
    debug!("{config:#?}");

    let backend = Arc::new(YtDlp::new(&config.ytdlp_path, config.extract_timeout));
    let resolver = Arc::new(Resolver::new(
        &config,
        backend,
        Some(http::Client::new(&config)?),
    ));

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let player = Player::new(&config, Arc::clone(&resolver)).with_events(events_tx);
    let handle = player.handle();
    let playback = tokio::spawn(player.run());

    let controller = Controller::new(
        &config,
        handle.clone(),
        resolver,
        Arc::new(Simulator::new()),
        Arc::new(JsonFileStore::new(&config.playlist_file)),
    );

    let ctx = Context {
        guild: GuildId(args.guild),
        user: UserId(args.user),
        channel_name: args.channel.clone(),
        channel: Arc::new(ConsoleChannel::new()),
        voice: Some(VoiceChannel {
            id: 1,
            name: args.voice.clone(),
        }),
    };

    let mut signals = signal::Handler::new()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("type \"help\" for a list of commands");

    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            signal = signals.recv() => {
                info!("{signal} received, shutting down gracefully");
                break;
            }

            Some(event) = events.recv() => log_event(event),

            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("end of input, shutting down gracefully");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let command = match parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(Command::Help) => {
                        println!("{HELP}");
                        continue;
                    }
                    Ok(command) => command,
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                };

                match execute(&controller, &ctx, command).await {
                    Ok(Some(reply)) if reply.ephemeral => println!("(only you) {}", reply.text),
                    Ok(Some(reply)) => println!("{}", reply.text),
                    Ok(None) => {}
                    Err(e) => error!("{e}"),
                }
            }
        }
    }

    handle.shutdown().await?;
    playback.await?;
    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
