fn main() {
    if let Err(error) = lead_dashboard_lib::run() {
        eprintln!("lead-dashboard: {error:#}");
        std::process::exit(1);
    }
}
