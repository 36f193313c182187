// 🛡️ Zero-Trust Architecture: traits at the seams, concrete system implementations behind them.

pub mod traits;     // Global contracts (broker, backend)
pub mod secrets;    // Memory hygiene (Credential)
pub mod catalog;    // Secret model & registry
pub mod broker;     // Broker token endpoint
pub mod vault;      // Backend HTTP API
pub mod bootstrap;  // Wrapped-token exchange & session
pub mod retrieval;  // Credential fetch & materialization
pub mod process;    // Workload child process
