#[tokio::main]
async fn main() {
    sv_cli::init_tracing();
    let exit_code = sv_cli::run_cli_from_args(std::env::args_os()).await;
    std::process::exit(exit_code);
}
