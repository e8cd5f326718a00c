pub(crate) mod sc_controller;
