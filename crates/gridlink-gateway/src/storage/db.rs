//! SQLite database handle for the gateway.

gridlink_core::define_database!(GatewayDatabase, "Gateway database migrations complete");
