#![no_std]

use soroban_sdk::{
    contract, contracterror, contractimpl, symbol_short, Address, Env, Symbol, Val, Vec,
};

mod storage;

pub use storage::{MiddlewareConfig, ProxyState};


#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ProxyError {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    Unauthorized = 3,
}

#[contract]
pub struct UpgradeableProxy;

#[contractimpl]
impl UpgradeableProxy {
    /// Stores the admin, the first logic pointer and the middleware
    /// configuration. Callable once.
    pub fn init(
        env: Env,
        admin: Address,
        implementation: Address,
        config: MiddlewareConfig,
    ) -> Result<(), ProxyError> {
        if storage::has_state(&env) {
            return Err(ProxyError::AlreadyInitialized);
        }
        admin.require_auth();

        storage::set_state(
            &env,
            &ProxyState {
                implementation: implementation.clone(),
                previous_implementation: None,
                admin,
                version: 1,
            },
        );
        storage::set_config(&env, &config);

        env.events()
            .publish((symbol_short!("init"),), (implementation, 1u32));
        Ok(())
    }

    /// Points the proxy at a new logic contract. Only the admin may call it.
    /// Re-pointing at the current logic is allowed and still bumps the version.
    pub fn upgrade(
        env: Env,
        caller: Address,
        new_implementation: Address,
    ) -> Result<u32, ProxyError> {
        caller.require_auth();

        let mut state = storage::get_state(&env).ok_or(ProxyError::NotInitialized)?;
        if caller != state.admin {
            return Err(ProxyError::Unauthorized);
        }

        state.previous_implementation = Some(state.implementation.clone());
        state.implementation = new_implementation.clone();
        state.version = state.version.saturating_add(1);
        storage::set_state(&env, &state);

        env.events().publish(
            (symbol_short!("upgraded"), caller),
            (new_implementation, state.version),
        );
        Ok(state.version)
    }

    pub fn implementation(env: Env) -> Result<Address, ProxyError> {
        storage::get_state(&env)
            .map(|state| state.implementation)
            .ok_or(ProxyError::NotInitialized)
    }

    pub fn admin(env: Env) -> Result<Address, ProxyError> {
        storage::get_state(&env)
            .map(|state| state.admin)
            .ok_or(ProxyError::NotInitialized)
    }

    pub fn version(env: Env) -> Result<u32, ProxyError> {
        storage::get_state(&env)
            .map(|state| state.version)
            .ok_or(ProxyError::NotInitialized)
    }

    pub fn config(env: Env) -> Result<MiddlewareConfig, ProxyError> {
        storage::get_config(&env).ok_or(ProxyError::NotInitialized)
    }

    /// Forwards a call to the current logic contract.
    pub fn call(env: Env, fn_name: Symbol, args: Vec<Val>) -> Result<Val, ProxyError> {
        let state = storage::get_state(&env).ok_or(ProxyError::NotInitialized)?;
        Ok(env.invoke_contract::<Val>(&state.implementation, &fn_name, args))
    }
}
