fn main() -> Result<(), Box<dyn std::error::Error>> {
    mcphost::cli::main()
}
