fn main() {
    #[cfg(feature = "cli")]
    dfwpatch::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("dfwpatch: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
