/*!
Here we go!

```bash
LOG_LEVEL=info portal [ path/to/portal.toml ]
```
*/
use simplelog::{ColorChoice, TerminalMode, TermLogger};

use portal::config;
use portal::inter;

#[tokio::main]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("portal")
        .build();
    TermLogger::init(
        portal::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ).unwrap();
    log::info!("Logging started.");

    let cfg = match std::env::args().nth(1) {
        Some(path) => config::Cfg::from_file(&path).unwrap(),
        None => {
            log::info!("No configuration file given; using defaults.");
            config::Cfg::default()
        },
    };
    log::info!("Configuration:\n{:#?}", &cfg);
    log::warn!("Logins are decided by username alone; passwords are not checked.");

    let glob = config::load_configuration(&cfg).unwrap();
    let app = inter::router(glob);

    log::info!("Listening on {}", &cfg.addr);

    axum::Server::bind(&cfg.addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
