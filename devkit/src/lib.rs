/*!
# SystemPub DevKit - stubs for developing without a broker

- MQTT transport and event source stubs for running the connection manager offline
- Scripted probers standing in for sanoid and systemctl
- A test harness wiring the agent's components together
*/

pub mod mqtt_stub;
pub mod probe_stub;
pub mod test_utils;

pub use mqtt_stub::{scripted_events, EventInjector, MockTransport, ScriptedEvents};
pub use probe_stub::{Outcome, ScriptedProber};
pub use test_utils::TestHarness;
