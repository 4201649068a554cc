// Engine module - route geometry, junctions, travelers and their rendering glue

pub mod camera;
pub mod components;
pub mod curve;
pub mod debug_overlay;
pub mod events;
pub mod follower;
pub mod junction;
pub mod mesh;
pub mod network;
pub mod path;
pub mod persistence;
pub mod resample;
pub mod ribbon;
pub mod systems;

// Re-export commonly used items
pub use components::*;
pub use curve::{BezierSegment, ControlPoint, DEFAULT_TANGENT};
pub use events::{EventDispatcher, HandlerError, JunctionCrossed, PathRebuilt, ReachedEnd, SubscriptionId, TravelerMoved};
pub use follower::{TravelPose, TravelStep, Traveler};
pub use junction::{Connection, JunctionCrossing, JunctionGraph, Node, NodeId};
pub use mesh::{RenderMesh, RibbonVertex};
pub use network::{NetworkError, PathId, RouteNetwork};
pub use path::{PathError, PathGeometry, PathTransform};
pub use persistence::{DocumentError, RouteDocument};
pub use resample::{SamplePoint, SamplingConfig};
pub use ribbon::{RibbonExtruder, RibbonMesh, RibbonSettings, SubmeshKind};
pub use systems::{advance_travelers, FollowReport, FollowerClock};
