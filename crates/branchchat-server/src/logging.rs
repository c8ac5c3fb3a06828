use std::io::Write;

/// Initialise `env_logger`.
///
/// `RUST_LOG` wins when set; otherwise `debug` selects debug output for the workspace crates.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "info,branchchat_core=debug,branchchat_llm=debug,branchchat_engine=debug,branchchat_server=debug"
    } else {
        "info"
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
