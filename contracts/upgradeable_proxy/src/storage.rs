use soroban_sdk::{contracttype, Address, Env};

/// Logic pointer and upgrade authority held by the proxy.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyState {
    pub implementation: Address,
    pub previous_implementation: Option<Address>,
    pub admin: Address,
    pub version: u32,
}

/// Initializer arguments of the middleware. Lives in the proxy so it
/// survives logic upgrades.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MiddlewareConfig {
    pub network: Address,
    pub operator_registry: Address,
    pub vault_factory: Address,
    pub operator_net_opt_in: Address,
    pub epoch_duration: u64,
    pub slashing_window: u64,
}

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    State,
    Config,
}

pub fn has_state(env: &Env) -> bool {
    env.storage().instance().has(&DataKey::State)
}

pub fn get_state(env: &Env) -> Option<ProxyState> {
    env.storage().instance().get(&DataKey::State)
}

pub fn set_state(env: &Env, state: &ProxyState) {
    env.storage().instance().set(&DataKey::State, state);
}

pub fn get_config(env: &Env) -> Option<MiddlewareConfig> {
    env.storage().instance().get(&DataKey::Config)
}

pub fn set_config(env: &Env, config: &MiddlewareConfig) {
    env.storage().instance().set(&DataKey::Config, config);
}
