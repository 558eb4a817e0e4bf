use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lawvina_chat::{
    ChatClient, ChatSession, ConversationStore, DEFAULT_DOCUMENT_LIMIT, FileStorage, lock_store,
    shared_store,
};

mod config;
mod home;
mod logging;
mod repl;
mod transcript;

use crate::config::load_app_config;
use crate::home::LawvinaHome;
use crate::transcript::{render_conversation_list, render_document, render_document_list};

#[derive(Parser, Debug)]
#[command(name = "lawvina", version, about = "LawVina legal assistant client")]
struct Cli {
    #[arg(long, global = true)]
    conf_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<RootCommand>,
}

#[derive(Subcommand, Debug, Clone)]
enum RootCommand {
    /// Interactive chat on the active conversation
    Chat,
    /// Search the document library
    Documents(DocumentsArgs),
    /// Print one document
    Document(DocumentArgs),
    /// List stored conversations
    Conversations,
}

#[derive(Args, Debug, Clone)]
struct DocumentsArgs {
    #[arg(long, short, default_value = "")]
    query: String,
    #[arg(long, short, default_value_t = DEFAULT_DOCUMENT_LIMIT)]
    limit: usize,
}

#[derive(Args, Debug, Clone)]
struct DocumentArgs {
    id: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match Runtime::load(cli.conf_dir.as_deref()) {
        Ok(runtime) => runtime.run(cli.command.unwrap_or(RootCommand::Chat)).await,
        Err(error) => Err(error),
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

struct Runtime {
    home: LawvinaHome,
    session: ChatSession,
}

impl Runtime {
    fn load(conf_dir: Option<&std::path::Path>) -> Result<Self, String> {
        let home = LawvinaHome::resolve(conf_dir);
        let config = load_app_config(&home)?;
        if let Err(error) = logging::init_tracing(&config.log) {
            eprintln!("warning: logging disabled: {error}");
        }
        tracing::info!(
            home = %home.root().display(),
            base_url = %config.client.base_url,
            mode = config.mode.as_str(),
            "lawvina starting"
        );

        let store = ConversationStore::load(Box::new(FileStorage::new(home.storage_dir())));
        let session = ChatSession::new(ChatClient::new(config.client), shared_store(store))
            .with_mode(config.mode)
            .with_flush_interval(config.flush_interval);
        Ok(Self { home, session })
    }

    async fn run(mut self, command: RootCommand) -> Result<(), String> {
        match command {
            RootCommand::Chat => repl::run_repl(&mut self.session).await,
            RootCommand::Documents(args) => {
                let documents = self
                    .session
                    .client()
                    .list_documents(&args.query, args.limit)
                    .await
                    .map_err(|error| error.to_string())?;
                print!("{}", render_document_list(&documents));
                Ok(())
            }
            RootCommand::Document(args) => {
                let document = self
                    .session
                    .client()
                    .get_document(&args.id)
                    .await
                    .map_err(|error| error.to_string())?;
                print!("{}", render_document(&document));
                Ok(())
            }
            RootCommand::Conversations => {
                let mut store = lock_store(self.session.store());
                if let Some(advisory) = store.take_advisory() {
                    eprintln!("warning: {advisory}");
                }
                println!("storage: {}", self.home.storage_dir().display());
                print!(
                    "{}",
                    render_conversation_list(store.conversations(), store.active_id())
                );
                Ok(())
            }
        }
    }
}
