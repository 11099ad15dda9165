use colored::Colorize;

#[tokio::main]
async fn main() {
    match pve_balancer::cli::run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            std::process::exit(1);
        }
    }
}
