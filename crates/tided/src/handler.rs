//! Command handler for the RESP server

use std::sync::Arc;

use serde_json::{json, Value};
use tidecache::{KvCache, WatchProxy};
use tidestore::{Event, MemoryBackend};

use crate::resp::RespValue;

/// What the connection loop should do with a parsed command
#[derive(Debug, PartialEq)]
pub enum Action {
    /// Write this reply and read the next command
    Reply(RespValue),
    /// Switch the connection into watch mode on this key
    Watch(String),
}

pub struct CommandHandler {
    backend: Arc<MemoryBackend>,
    values: Arc<KvCache>,
    proxy: Arc<WatchProxy>,
}

impl CommandHandler {
    pub fn new(backend: Arc<MemoryBackend>, values: Arc<KvCache>, proxy: Arc<WatchProxy>) -> Self {
        Self {
            backend,
            values,
            proxy,
        }
    }

    pub fn handle(&self, cmd: RespValue) -> Action {
        let arr = match cmd {
            RespValue::Array(Some(arr)) if !arr.is_empty() => arr,
            _ => return Action::Reply(RespValue::error("ERR invalid command format")),
        };

        let command = match arr[0].as_bytes() {
            Some(name) => String::from_utf8_lossy(name).to_uppercase(),
            None => return Action::Reply(RespValue::error("ERR invalid command")),
        };
        let args = &arr[1..];

        let reply = match command.as_str() {
            "PING" => self.handle_ping(args),
            "ECHO" => self.handle_echo(args),
            "GET" => self.handle_get(args),
            "SET" => self.handle_set(args),
            "DEL" => self.handle_del(args),
            "EXISTS" => self.handle_exists(args),
            "DBSIZE" => RespValue::Integer(self.backend.len() as i64),
            "WATCH" => return self.handle_watch(args),
            "INFO" => self.handle_info(),
            // redis-cli sends COMMAND on connect
            "COMMAND" => RespValue::array(Vec::new()),
            _ => RespValue::error(format!("ERR unknown command '{}'", command)),
        };
        Action::Reply(reply)
    }

    fn handle_ping(&self, args: &[RespValue]) -> RespValue {
        match args {
            [] => RespValue::SimpleString("PONG".to_string()),
            [msg] => msg.clone(),
            _ => wrong_args("ping"),
        }
    }

    fn handle_echo(&self, args: &[RespValue]) -> RespValue {
        match args {
            [msg] => msg.clone(),
            _ => wrong_args("echo"),
        }
    }

    fn handle_get(&self, args: &[RespValue]) -> RespValue {
        let [key] = args else {
            return wrong_args("get");
        };
        let Some(key) = key.as_str() else {
            return RespValue::error("ERR invalid key");
        };

        if let Some(value) = self.values.get(key) {
            return RespValue::bulk(value);
        }

        match self.backend.get(key) {
            Some(kv) => {
                // Only UTF-8 values fit the string cache
                if let Ok(value) = std::str::from_utf8(&kv.value) {
                    self.values.put(key, value);
                }
                RespValue::bulk(kv.value.to_vec())
            }
            None => RespValue::nil(),
        }
    }

    fn handle_set(&self, args: &[RespValue]) -> RespValue {
        let [key, value] = args else {
            return wrong_args("set");
        };
        let Some(key) = key.as_str() else {
            return RespValue::error("ERR invalid key");
        };
        let Some(value) = value.as_bytes() else {
            return RespValue::error("ERR invalid value type");
        };

        if let Err(e) = self.backend.put(key, value.to_vec()) {
            return RespValue::error(format!("ERR {}", e));
        }
        match std::str::from_utf8(value) {
            Ok(value) => self.values.put(key, value),
            Err(_) => {
                self.values.remove(key);
            }
        }
        RespValue::ok()
    }

    fn handle_del(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return wrong_args("del");
        }

        let mut deleted = 0i64;
        for key in args.iter().filter_map(RespValue::as_str) {
            self.values.remove(key);
            match self.backend.delete(key) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => return RespValue::error(format!("ERR {}", e)),
            }
        }

        RespValue::Integer(deleted)
    }

    fn handle_exists(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return wrong_args("exists");
        }

        let count = args
            .iter()
            .filter_map(RespValue::as_str)
            .filter(|key| self.backend.get(key).is_some())
            .count();

        RespValue::Integer(count as i64)
    }

    fn handle_watch(&self, args: &[RespValue]) -> Action {
        let [key] = args else {
            return Action::Reply(wrong_args("watch"));
        };
        match key.as_str() {
            Some(key) => Action::Watch(key.to_string()),
            None => Action::Reply(RespValue::error("ERR invalid key")),
        }
    }

    fn handle_info(&self) -> RespValue {
        let events = self.proxy.events();
        let stats = events.stats().snapshot();
        let info = format!(
            "# Server\r\n\
             tided_version:{}\r\n\
             \r\n\
             # Store\r\n\
             total_keys:{}\r\n\
             revision:{}\r\n\
             value_cache_keys:{}\r\n\
             \r\n\
             # WatchCache\r\n\
             watch_cache_size:{}\r\n\
             watch_cache_capacity:{}\r\n\
             watch_cache_hits:{}\r\n\
             watch_cache_misses:{}\r\n\
             watch_cache_stores:{}\r\n\
             watch_cache_evictions:{}\r\n\
             watch_cache_hit_ratio:{:.2}\r\n\
             active_drains:{}\r\n",
            env!("CARGO_PKG_VERSION"),
            self.backend.len(),
            self.backend.revision(),
            self.values.len(),
            events.len(),
            events.capacity(),
            stats.hits,
            stats.misses,
            stats.stores,
            stats.evictions,
            stats.hit_ratio(),
            self.proxy.active_drains(),
        );
        RespValue::bulk(info)
    }
}

fn wrong_args(command: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        command
    ))
}

/// Push frame carrying one event batch
pub fn watch_frame(key: &str, events: &[Event]) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk("watch"),
        RespValue::bulk(key),
        RespValue::bulk(batch_json(events).to_string()),
    ])
}

/// Push frame closing a watch
pub fn unwatch_frame(key: &str) -> RespValue {
    RespValue::array(vec![RespValue::bulk("unwatch"), RespValue::bulk(key)])
}

fn batch_json(events: &[Event]) -> Value {
    events
        .iter()
        .map(|event| {
            json!({
                "type": event.kind.as_str(),
                "key": String::from_utf8_lossy(&event.kv.key),
                "value": String::from_utf8_lossy(&event.kv.value),
                "create_revision": event.kv.create_revision,
                "mod_revision": event.kv.mod_revision,
                "version": event.kv.version,
                "prev_value": event
                    .prev_kv
                    .as_ref()
                    .map(|prev| String::from_utf8_lossy(&prev.value)),
            })
        })
        .collect()
}
