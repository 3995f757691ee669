//! Typed scenario commands
//!
//! The parser turns each scenario line into one of these records; the
//! orchestrator executes them in order. All numeric constraints are already
//! enforced by the parser, so executors can trust the ranges.

/// A command together with the scenario line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    /// 1-based scenario line number, for error reporting
    pub line: usize,
    /// The command
    pub command: Command,
}

/// A positional range of servers or group members: 1-based index, count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRange {
    /// Group name
    pub group: String,
    /// 1-based first member
    pub index: usize,
    /// Number of members
    pub count: usize,
}

/// Create a group of servers placed uniformly in a disc.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateServers {
    /// Group name; instances are named `group` + zero-padded(3) 1-based index
    pub group: String,
    /// Number of servers to create
    pub count: usize,
    /// Base port of the first server; each server reserves 20 ports
    pub base_port: u16,
    /// Disc centre latitude
    pub latitude: f64,
    /// Disc centre longitude
    pub longitude: f64,
    /// Disc radius in metres
    pub radius: u32,
}

/// Create identities hosted across a range of profile servers.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIdentities {
    /// Identity group name; members are named `group` + zero-padded(5) index
    pub group: String,
    /// Number of identities to create
    pub create_count: usize,
    /// Identity type string
    pub identity_type: String,
    /// Placement disc centre latitude
    pub latitude: f64,
    /// Placement disc centre longitude
    pub longitude: f64,
    /// Placement disc radius in metres
    pub radius: u32,
    /// Wildcard mask for candidate profile images
    pub profile_image_mask: String,
    /// Percent chance an identity gets a profile image
    pub profile_image_chance: u32,
    /// Wildcard mask for candidate thumbnail images
    pub thumbnail_mask: String,
    /// Percent chance an identity gets a thumbnail
    pub thumbnail_chance: u32,
    /// The hosting profile servers
    pub servers: GroupRange,
}

/// Create activities owned by a range of identities.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateActivities {
    /// Activity group name; members are addressed positionally
    pub group: String,
    /// Number of activities to create
    pub create_count: usize,
    /// Placement disc centre latitude
    pub latitude: f64,
    /// Placement disc centre longitude
    pub longitude: f64,
    /// Minimum precision radius in metres
    pub precision_min: u32,
    /// Maximum precision radius in metres
    pub precision_max: u32,
    /// Placement disc radius in metres
    pub radius: u32,
    /// Earliest start offset in seconds relative to creation
    pub start_from: i64,
    /// Latest start offset in seconds relative to creation
    pub start_to: i64,
    /// Minimum lifetime in seconds
    pub lifetime_from: i64,
    /// Maximum lifetime in seconds
    pub lifetime_to: i64,
    /// The owning identities
    pub owners: GroupRange,
}

/// A profile search test query against a range of profile servers.
#[derive(Debug, Clone, PartialEq)]
pub struct TestQuery {
    /// The queried servers
    pub servers: GroupRange,
    /// Profile-name wildcard filter; `**` disables
    pub name_filter: String,
    /// Profile-type wildcard filter; `**` disables
    pub type_filter: String,
    /// Request image bytes with each result
    pub include_images: bool,
    /// Location filter centre, absent when `NO_LOCATION`
    pub location: Option<(f64, f64)>,
    /// Location filter radius in metres
    pub radius: u32,
}

/// An activity search test query against a range of proximity servers.
#[derive(Debug, Clone, PartialEq)]
pub struct TestQueryActivity {
    /// The queried servers
    pub servers: GroupRange,
    /// Activity-type wildcard filter; `**` disables
    pub type_filter: String,
    /// Offset in seconds relative to query time; activities must start at
    /// or before it. Absent when `ANY`.
    pub start_not_after: Option<i64>,
    /// Offset in seconds relative to query time; activities must expire at
    /// or after it. Absent when `ANY`.
    pub expiration_not_before: Option<i64>,
    /// Location filter centre, absent when `NO_LOCATION`
    pub location: Option<(f64, f64)>,
    /// Location filter radius in metres
    pub radius: u32,
}

/// One scenario command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create profile servers
    ProfileServer(CreateServers),
    /// Create proximity servers
    ProximityServer(CreateServers),
    /// Start child processes
    StartServer(GroupRange),
    /// Stop child processes
    StopServer(GroupRange),
    /// Bidirectionally pair every server across the listed ranges
    Neighborhood(Vec<GroupRange>),
    /// Undo [`Command::Neighborhood`] for the listed ranges
    CancelNeighborhood(Vec<GroupRange>),
    /// Directed neighbor edges from one server to each target
    Neighbor {
        /// Source server instance name
        source: String,
        /// Target server instance names
        targets: Vec<String>,
    },
    /// Remove directed neighbor edges
    CancelNeighbor {
        /// Source server instance name
        source: String,
        /// Target server instance names
        targets: Vec<String>,
    },
    /// Create identities
    Identity(CreateIdentities),
    /// Cancel the hosting of a range of identities
    CancelIdentity {
        /// Identity group name
        group: String,
        /// 1-based first member
        index: usize,
        /// Number of members
        count: usize,
    },
    /// Create activities
    Activity(CreateActivities),
    /// Delete a range of activities
    DeleteActivity {
        /// Activity group name
        group: String,
        /// 1-based first slot
        index: usize,
        /// Number of slots
        count: usize,
    },
    /// Profile search with predicted-result comparison
    TestQuery(TestQuery),
    /// Activity search with predicted-result comparison
    TestQueryActivity(TestQueryActivity),
    /// Block for a duration in seconds
    Delay {
        /// Seconds to wait
        seconds: f64,
    },
    /// Freeze the whole simulation state to disk
    TakeSnapshot {
        /// Snapshot name
        name: String,
    },
    /// Rehydrate a snapshot; must be the first command
    LoadSnapshot {
        /// Snapshot name
        name: String,
    },
    /// Toggle verbose test-query comparison logs
    DebugMode {
        /// Whether verbose comparison is on
        enabled: bool,
    },
}
