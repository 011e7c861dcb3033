fn main() -> std::process::ExitCode {
    tourdesk_cli::run()
}
