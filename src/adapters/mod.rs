//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                  |
//! |----------------|--------------------|------------------------------|
//! | `gpio`         | OutputPin          | Linux `/sys/class/gpio`      |
//! | `log_sink`     | EventSink          | `log` facade                 |
//! | `memory_store` | RecordStore        | In-process vectors           |
//! | `mqtt`         | CommandTransport   | MQTT broker (subscriber)     |
//! |                | CommandPublisher   | MQTT broker (publisher)      |
//! | `relay_state`  | RelayStateStore    | postcard file                |
//! | `sqlite_store` | RecordStore        | SQLite database              |

pub mod gpio;
pub mod log_sink;
pub mod memory_store;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod relay_state;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;
