use metascout::cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    cli::main()
}
