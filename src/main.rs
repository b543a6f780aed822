fn main() {
    let args = std::env::args();
    // Initialize logging as early as possible; fallback to stderr on failure.
    let _ = tierfs::logging::init_logging(tierfs::logging::LogFormat::Human);

    if let Err(err) = tierfs::run(args) {
        eprintln!("tierfs error: {err}");
        std::process::exit(1);
    }
}
