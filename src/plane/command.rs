//! The hosted command surface.
//!
//! The wire protocol itself lives in the hosting adapter; this module is
//! the typed boundary it calls into. Commands arrive as argument vectors
//! and come back as either an immediate [`Reply`] or a blocked
//! [`ClientHandle`] the adapter must park the connection on.
//!
//! | Command | Args | Semantics |
//! | --- | --- | --- |
//! | `GET` | key | Read-through, dedup-aware |
//! | `SET` | key value | Write-through with cache coherence |
//! | `SETC` | key value | Cache-only write (warmup) |
//! | `LOAD` | path | Bulk SETC from CSV `key,val_size` |
//! | `STATS` | | Ghost curve report + resource counters |
//! | `RESRC.GET` / `RESRC.SET` | 4 values | Resource caps; −1 skips |
//! | `CONFIG.GET` / `CONFIG.SET` | key [val…] | Config plane |
//! | `GHOST.SAVE` / `GHOST.LOAD` | | Ghost-cache checkpoint |
//! | `BARRIER.WAIT/SIGNAL/COUNT` | | Client barrier |

use crate::plane::client::{ClientHandle, Reply};
use crate::plane::instance::Instance;

/// Result of dispatching one command.
#[derive(Debug)]
pub enum CommandOutcome {
    /// The command was answered synchronously.
    Immediate(Reply),
    /// The client must block; the handle resolves later (after
    /// [`Instance::pump`] processes the completion, or a barrier signal).
    Blocked(ClientHandle),
}

impl CommandOutcome {
    /// Unwraps an immediate reply; panics on a blocked outcome.
    /// Test convenience.
    pub fn expect_immediate(self) -> Reply {
        match self {
            CommandOutcome::Immediate(reply) => reply,
            CommandOutcome::Blocked(_) => panic!("expected an immediate reply"),
        }
    }
}

fn wrong_arity(cmd: &str) -> CommandOutcome {
    CommandOutcome::Immediate(Reply::err(format!(
        "ERR wrong number of arguments for '{cmd}'"
    )))
}

/// Dispatches one command against an instance.
pub fn dispatch(inst: &mut Instance, argv: &[&str]) -> CommandOutcome {
    use CommandOutcome::{Blocked, Immediate};

    let Some(&cmd) = argv.first() else {
        return Immediate(Reply::err("ERR empty command"));
    };

    match cmd.to_ascii_uppercase().as_str() {
        "GET" => match argv {
            [_, key] => Blocked(inst.get(key)),
            _ => wrong_arity("GET"),
        },
        "SET" => match argv {
            [_, key, value] => Blocked(inst.set(key, value)),
            _ => wrong_arity("SET"),
        },
        "SETC" => match argv {
            [_, key, value] => Immediate(inst.setc(key, value)),
            _ => wrong_arity("SETC"),
        },
        "LOAD" => match argv {
            [_, path] => Immediate(inst.load_csv(path)),
            _ => wrong_arity("LOAD"),
        },
        "STATS" => match argv {
            [_] => Immediate(inst.stats_reply()),
            _ => wrong_arity("STATS"),
        },
        "RESRC.GET" => match argv {
            [_] => Immediate(inst.resrc_get()),
            _ => wrong_arity("RESRC.GET"),
        },
        "RESRC.SET" => match argv {
            [_, cache_size, db_rcu, db_wcu, net_bw] => {
                let Ok(cache_size) = cache_size.parse::<i64>() else {
                    return Immediate(Reply::err("ERR Fail to parse <cache_size>"));
                };
                let Ok(db_rcu) = db_rcu.parse::<f64>() else {
                    return Immediate(Reply::err("ERR Fail to parse <db_rcu>"));
                };
                let Ok(db_wcu) = db_wcu.parse::<f64>() else {
                    return Immediate(Reply::err("ERR Fail to parse <db_wcu>"));
                };
                let Ok(net_bw) = net_bw.parse::<f64>() else {
                    return Immediate(Reply::err("ERR Fail to parse <net_bw>"));
                };
                Immediate(inst.resrc_set(cache_size, db_rcu, db_wcu, net_bw))
            }
            _ => wrong_arity("RESRC.SET"),
        },
        "CONFIG.GET" => match argv {
            [_] => Immediate(inst.config_get()),
            _ => wrong_arity("CONFIG.GET"),
        },
        "CONFIG.SET" => dispatch_config_set(inst, argv),
        "GHOST.SAVE" => match argv {
            [_] => Immediate(inst.ghost_save()),
            _ => wrong_arity("GHOST.SAVE"),
        },
        "GHOST.LOAD" => match argv {
            [_] => Immediate(inst.ghost_load()),
            _ => wrong_arity("GHOST.LOAD"),
        },
        "BARRIER.WAIT" => match argv {
            [_] => Blocked(inst.barrier_wait()),
            _ => wrong_arity("BARRIER.WAIT"),
        },
        "BARRIER.SIGNAL" => match argv {
            [_] => Immediate(inst.barrier_signal()),
            _ => wrong_arity("BARRIER.SIGNAL"),
        },
        "BARRIER.COUNT" => match argv {
            [_] => Immediate(inst.barrier_count()),
            _ => wrong_arity("BARRIER.COUNT"),
        },
        _ => Immediate(Reply::err(format!("ERR unknown command '{cmd}'"))),
    }
}

fn dispatch_config_set(inst: &mut Instance, argv: &[&str]) -> CommandOutcome {
    use CommandOutcome::Immediate;

    if argv.len() < 3 {
        return wrong_arity("CONFIG.SET");
    }
    match argv[1] {
        "dynamo.table" => match argv {
            [_, _, table] => Immediate(inst.set_dynamo_table(table)),
            _ => wrong_arity("CONFIG.SET"),
        },
        "dynamo.mock" => match argv[2] {
            "disable" => match argv {
                [_, _, _] => Immediate(inst.set_mock_disable()),
                _ => wrong_arity("CONFIG.SET"),
            },
            "image" => Immediate(inst.set_mock_image(&argv[3..])),
            "format" => match argv {
                [_, _, _, key_size, val_size] => {
                    let Ok(key_size) = key_size.parse::<u32>() else {
                        return Immediate(Reply::err(
                            "ERR Invalid `key_size` for <dynamo.mock>",
                        ));
                    };
                    let Ok(val_size) = val_size.parse::<u32>() else {
                        return Immediate(Reply::err(
                            "ERR Invalid `val_size` for <dynamo.mock>",
                        ));
                    };
                    Immediate(inst.set_mock_format(key_size, val_size))
                }
                _ => wrong_arity("CONFIG.SET"),
            },
            _ => Immediate(Reply::err("ERR Invalid option for <dynamo.mock>")),
        },
        "cache.admit_write" => match argv {
            [_, _, "true"] => Immediate(inst.set_admit_write(true)),
            [_, _, "false"] => Immediate(inst.set_admit_write(false)),
            _ => Immediate(Reply::err("ERR Invalid value for <cache.admit_write>")),
        },
        "ghost.range" => match argv {
            [_, _, tick, min_tick, max_tick] => {
                let Ok(tick) = tick.parse::<u32>() else {
                    return Immediate(Reply::err("ERR Invalid value for <ghost.range:tick>"));
                };
                let Ok(min_tick) = min_tick.parse::<u32>() else {
                    return Immediate(Reply::err(
                        "ERR Invalid value for <ghost.range:min_tick>",
                    ));
                };
                let Ok(max_tick) = max_tick.parse::<u32>() else {
                    return Immediate(Reply::err(
                        "ERR Invalid value for <ghost.range:max_tick>",
                    ));
                };
                Immediate(inst.set_ghost_range(tick, min_tick, max_tick))
            }
            _ => wrong_arity("CONFIG.SET"),
        },
        "policy.alloc_total_net_bw" => Immediate(Reply::err(
            "ERR <policy.alloc_total_net_bw> is not configurable",
        )),
        _ => Immediate(Reply::err("ERR unrecognized config")),
    }
}
