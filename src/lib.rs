pub mod core {
    pub mod config;
    pub mod error;
    pub mod poller;
    pub mod routes;
    pub mod state;
    pub mod tracing_init;
}

pub mod models {
    pub mod patch;
    pub mod server;
    pub mod task;
}

pub mod transport {
    pub mod http;
    pub mod retry;
}

pub mod codec {
    pub mod jsonrpc;
    pub mod xmlrpc;
}

pub mod vault {
    pub mod crypto;
    pub mod service;
    pub mod session;
}

pub mod differ {
    pub mod patch;
    pub mod savings;
}

pub mod stores {
    pub mod kv_store;
    pub mod snapshot_store;
}

pub mod clients {
    pub mod aria2;
    pub mod client;
    pub mod factory;
    pub mod flood;
    pub mod qbittorrent;
    pub mod rtorrent;
    pub mod transmission;
    pub mod utorrent;

    #[cfg(test)]
    pub mod mock_server;
}

pub mod metrics {
    pub mod collector;
}

pub mod handlers {
    pub mod fallback;
    pub mod health;
    pub mod metrics;
    pub mod servers;
}

pub mod utils {
    pub mod time;
}
