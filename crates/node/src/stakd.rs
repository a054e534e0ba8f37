fn main() {
    if let Err(err) = stakd_node::run_entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
