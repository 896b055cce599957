fn main() {
    #[cfg(feature = "cli")]
    oxichm::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("oxichm: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
