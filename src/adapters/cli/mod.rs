pub(crate) mod console_cli_adapter;
