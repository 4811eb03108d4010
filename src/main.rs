//! Process entry point: CLI parsing, module wiring, lifecycle, signal
//! handling.
//!
//! Grounded in `original_source/src/main.py` and `util/loader.py`'s
//! `ModuleLoader` (parse args, build modules, `start_modules`, wait for
//! shutdown, `stop_modules`) and `util/sysargs.py` for the exact CLI
//! grammar. Where the original relies on import-time module registration
//! and a handful of process-wide singletons, this binary builds each piece
//! explicitly and registers it with a [`homehub::lifecycle::ModuleRegistry`]
//! (REDESIGN FLAGS §9): persistence/auth configure first, then the radio
//! link, then one module per configured transport — matching the original's
//! `RFModule` then `ClientModule` registration order, both depending on
//! `Authentication`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use clap::Parser;

use homehub::config::{parse_communication_entry, resolve_transport, Args, TransportConfig};
use homehub::dispatcher::{Dispatcher, RadioDeviceHandler};
use homehub::entities::register_builtin_types;
use homehub::lifecycle::{Module, ModuleRegistry};
use homehub::localization::Localization;
use homehub::persistence::memory_store::MemoryStore;
use homehub::radio::registers::{DEFAULT_CHANNEL, DEFAULT_RX_ADDR, DEFAULT_TX_ADDR};
use homehub::radio::LinkManager;
use homehub::transport::tcp::{spawn_acceptor, TcpTransport};
use homehub::transport::udp::{spawn_receiver, UdpTransport};
use homehub::transport::Transport;

fn build_transceiver(args: &Args) -> homehub::error::Result<Box<dyn homehub::radio::Transceiver>> {
    #[cfg(feature = "linux")]
    {
        let device = homehub::radio::LinuxTransceiver::new(&args.spi, args.ce_pin, args.irq_pin, DEFAULT_CHANNEL, DEFAULT_RX_ADDR, DEFAULT_TX_ADDR)
            .map_err(|e| homehub::HubError::Radio(e.to_string()))?;
        Ok(Box::new(device))
    }
    #[cfg(all(feature = "mock", not(feature = "linux")))]
    {
        let _ = (args, DEFAULT_CHANNEL, DEFAULT_RX_ADDR, DEFAULT_TX_ADDR);
        Ok(Box::new(homehub::radio::MockTransceiver::new()))
    }
    #[cfg(not(any(feature = "linux", feature = "mock")))]
    {
        let _ = args;
        compile_error!("homehub requires either the \"linux\" or \"mock\" feature")
    }
}

/// The radio link is already running by the time it's handed to the
/// registry (`LinkManager::start` needs exclusive ownership, which it only
/// has before it's wrapped in the `Arc` every other module shares); `start`
/// here is therefore a no-op log line, and `stop` does the real work.
struct RadioModule {
    link: Arc<LinkManager>,
}

impl Module for RadioModule {
    fn name(&self) -> &str {
        "radio link"
    }

    fn start(&mut self) {
        log::info!("{} already running", self.name());
    }

    fn stop(&mut self) {
        self.link.stop();
    }
}

/// One module per configured transport: `start` binds the socket and spawns
/// its receive thread, `stop` closes it and joins the thread.
struct TransportModule<T: Transport + 'static> {
    label: String,
    transport: Arc<T>,
    spawn: fn(Arc<T>) -> JoinHandle<()>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Transport + 'static> Module for TransportModule<T> {
    fn name(&self) -> &str {
        &self.label
    }

    fn start(&mut self) {
        if let Err(err) = self.transport.start() {
            log::error!("failed to start {}: {:#}", self.label, err);
            return;
        }
        self.thread = Some((self.spawn)(Arc::clone(&self.transport)));
    }

    fn stop(&mut self) {
        self.transport.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn main() -> homehub::error::Result<()> {
    env_logger::init();
    let args = Args::parse();

    register_builtin_types();

    let store: &'static MemoryStore = Box::leak(Box::new(MemoryStore::new()));
    let localization: &'static Localization = Box::leak(Box::new(Localization::new(&args.lang)));
    for dir in &args.localizations {
        if let Err(err) = localization.load_dir(&PathBuf::from(dir)) {
            log::warn!("failed to load localization directory {}: {}", dir, err);
        }
    }

    let transceiver = build_transceiver(&args)?;
    let mut link = LinkManager::new(transceiver);
    link.start();
    let link = Arc::new(link);

    let image_search_path: Vec<PathBuf> = args.images.iter().map(PathBuf::from).collect();
    let dispatcher = Arc::new(Dispatcher::new(store, Arc::clone(&link), localization, image_search_path));
    dispatcher.configure()?;
    link.register_handler(Box::new(RadioDeviceHandler::new(store, Arc::clone(&dispatcher))));

    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(RadioModule { link: Arc::clone(&link) }));

    for raw_entry in &args.communication {
        let entry = parse_communication_entry(raw_entry);
        match resolve_transport(&entry) {
            Some(TransportConfig::Udp(cfg)) => {
                let udp = Arc::new(UdpTransport::new(cfg));
                let handler_dispatcher = Arc::clone(&dispatcher);
                udp.set_handler(Arc::new(move |transport: &dyn Transport, peer, msg_type, payload| {
                    handler_dispatcher.handle(transport, peer, msg_type, payload);
                }));
                let as_transport: Arc<dyn Transport> = udp.clone();
                dispatcher.add_transport(as_transport);
                registry.register(Box::new(TransportModule { label: format!("udp:{}", raw_entry), transport: udp, spawn: spawn_receiver, thread: None }));
            }
            Some(TransportConfig::Tcp(cfg)) => {
                let tcp = Arc::new(TcpTransport::new(cfg));
                let handler_dispatcher = Arc::clone(&dispatcher);
                tcp.set_handler(Arc::new(move |transport: &dyn Transport, peer, msg_type, payload| {
                    handler_dispatcher.handle(transport, peer, msg_type, payload);
                }));
                let as_transport: Arc<dyn Transport> = tcp.clone();
                dispatcher.add_transport(as_transport);
                registry.register(Box::new(TransportModule { label: format!("tcp:{}", raw_entry), transport: tcp, spawn: spawn_acceptor, thread: None }));
            }
            None => {}
        }
    }

    registry.initialize_all();
    registry.configure_all();
    registry.start_all();

    log::info!("homehub started with {} communication endpoint(s)", args.communication.len());

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;

    if args.server {
        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
    } else {
        println!("homehub running. Press Enter to stop.");
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    }

    log::info!("shutting down");
    registry.stop_all();

    Ok(())
}
