fn main() -> anyhow::Result<()> {
    remotesrv_server::cli::execute()
}
