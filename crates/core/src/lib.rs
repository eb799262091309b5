// amt-session: KVM session establishment and power orchestration for AMT devices
//
// The device gateway, the Redfish service, the relay endpoint, operator
// prompts and keyboard capture are reached through traits so the state
// machines here run the same against real services and the `fake` module.

pub mod consent;
pub mod controller;
pub mod display;
pub mod error;
pub mod fake;
pub mod gateway;
pub mod hotkey;
pub mod input;
pub mod notice;
pub mod pipeline;
pub mod poll;
pub mod power;
pub mod power_cycle;
pub mod redfish;
pub mod state;
pub mod timings;
pub mod transport;

pub use consent::{ConsentKind, ConsentNegotiator, ConsentPrompt, ConsentReply, DismissAll};
pub use controller::{SessionController, SessionControllerBuilder};
pub use display::DisplayOption;
pub use error::{Result, SessionError};
pub use gateway::{AuthToken, DeviceGateway, HttpGateway};
pub use hotkey::{Encoding, Hotkey};
pub use input::{CaptureHub, InputArbitration, KeyEventHub};
pub use notice::{MessageCatalog, MessageKey, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use pipeline::{ConsentRequest, FeatureCache, Outcome, PreconditionPipeline};
pub use poll::{Deadline, PollError, until_or_timeout};
pub use power::{PowerAction, PowerState};
pub use power_cycle::{CycleEvent, CyclePlan, CycleReport, CycleStep, GatewayPower, PowerControl, PowerCycleOrchestrator, RedfishPower};
pub use redfish::{AuthMode, RedfishClient, ResetAccepted};
pub use state::SessionState;
pub use timings::{CycleTimings, SessionTimings};
pub use transport::{RelayTarget, RelayTransport, TransportStatus, WsRelayTransport};
