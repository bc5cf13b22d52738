//! tinychain CLI
//!
//! Four commands mirror a node's lifecycle: generate a key, mine a
//! genesis block, write a config template, run the node.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tinychain::api::{self, ApiState};
use tinychain::config::Config;
use tinychain::core::block::DEFAULT_DIFFICULTY;
use tinychain::core::codec;
use tinychain::crypto::KeyPair;
use tinychain::mining::{self, Miner};
use tinychain::net::{InventoryManager, Node, NodeConfig};
use tinychain::wallet::HierarchicalWallet;
use tinychain::{Executor, Storage};
use tokio::sync::RwLock;

#[derive(Parser)]
#[command(name = "tinychain")]
#[command(version = "0.1.0")]
#[command(about = "A minimal proof-of-work UTXO blockchain node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key pair and write it to a key file
    Genkey {
        /// Output path for the key file
        #[arg(short, long, default_value = "key.json")]
        output: PathBuf,
    },

    /// Mine a genesis block granting the initial supply to a key
    Genesis {
        /// Key file of the supply recipient
        #[arg(short, long, default_value = "key.json")]
        key: PathBuf,

        /// Output path for the serialized genesis block
        #[arg(short, long, default_value = "genesis.bin")]
        output: PathBuf,

        /// Proof-of-work target for the genesis block
        #[arg(short, long, default_value_t = DEFAULT_DIFFICULTY)]
        difficulty: f64,
    },

    /// Write a config file template
    Config {
        /// Output path for the config file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Run the node
    Run {
        /// Config file to load
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Genkey { output } => {
            let key_pair = KeyPair::generate();
            key_pair.save_to(&output)?;
            println!("Wrote {} (address {})", output.display(), key_pair.address());
        }

        Commands::Genesis {
            key,
            output,
            difficulty,
        } => {
            let key_pair = KeyPair::load_from(&key)?;
            println!("Mining genesis block at difficulty {:.3e}...", difficulty);
            let genesis = mining::mine_genesis(&key_pair.address(), difficulty);
            fs::write(&output, codec::encode_block(&genesis))?;
            println!("Wrote {} (genesis id {})", output.display(), genesis.id);
        }

        Commands::Config { output } => {
            Config::default().save(&output)?;
            println!("Wrote {}", output.display());
        }

        Commands::Run { config } => run_node(&config).await?,
    }

    Ok(())
}

/// Start a node. Any failure to load config, key material or the genesis
/// block is fatal here.
async fn run_node(config_path: &PathBuf) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load(config_path)?;
    let key_pair = KeyPair::load_from(&config.key_file)?;

    // Derive the node's address hierarchy from the loaded key; mining
    // rewards go to the root address.
    let mut hd_wallet = HierarchicalWallet::from_root(key_pair);
    hd_wallet.extend(10)?;
    let mining_address = hd_wallet.addresses()[0].clone();
    log::info!(
        "Node identity: {} ({} derived addresses)",
        mining_address,
        hd_wallet.keys().len() - 1
    );

    let genesis_bytes = fs::read(&config.genesis_file)?;
    let genesis = codec::decode_block(&genesis_bytes)?;
    log::info!("Genesis id: {}", genesis.id);

    let mut executor = Executor::new(genesis)?;
    let mut inventory = InventoryManager::new();
    // Retain the genesis blob so peers can request it
    inventory.accept_block(genesis_bytes, &mut executor)?;

    let storage = Storage::open(&config.data_dir)?;
    let mut replayed = 0;
    for (id, bytes) in storage.load_all()? {
        match inventory.accept_block(bytes, &mut executor) {
            Ok(_) => replayed += 1,
            Err(e) => log::warn!("Stored block {} rejected on replay: {}", id, e),
        }
    }
    let tip = executor.tip_summary();
    log::info!(
        "Replayed {} stored block(s); tip {} at height {}",
        replayed,
        &tip.id[..8],
        tip.height
    );

    let executor = Arc::new(RwLock::new(executor));
    let inventory = Arc::new(RwLock::new(inventory));
    let storage = Arc::new(storage);

    let mut node = Node::new(
        NodeConfig {
            port: config.listen_port,
            bootstrap_peers: config.peers.clone(),
        },
        executor.clone(),
        inventory.clone(),
        storage,
    );

    let api_state = ApiState {
        executor: executor.clone(),
        inventory: inventory.clone(),
        peer_manager: node.peer_manager.clone(),
    };
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, api_port).await {
            log::error!("Status API failed: {}", e);
        }
    });

    if config.mine {
        let miner = Miner::new(&mining_address);
        tokio::spawn(mining::miner::run(
            miner,
            executor,
            inventory,
            node.peer_manager.clone(),
        ));
    }

    node.start().await
}
