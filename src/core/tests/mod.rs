pub(crate) mod mock_providers;
