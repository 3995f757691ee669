//! Scenario DSL parser
//!
//! Line-oriented UTF-8: blank lines and `#` comments are skipped, command
//! lines are split on runs of ASCII spaces. The first token is the
//! case-sensitive command keyword. Decimals use `.` in invariant culture.
//! Any violation aborts the whole parse with the line number, the offending
//! token, and the violated constraint.

use super::command::{
    Command, CreateActivities, CreateIdentities, CreateServers, GroupRange, ParsedCommand,
    TestQuery, TestQueryActivity,
};
use peernet_core::PORT_BLOCK_SIZE;

/// DSL sentinel disabling a location filter.
pub const NO_LOCATION: &str = "NO_LOCATION";

/// DSL sentinel disabling a time filter.
pub const ANY: &str = "ANY";

/// A parse failure, pinned to its scenario line.
#[derive(Debug, Clone, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ScenarioError {
    /// 1-based scenario line number
    pub line: usize,
    /// The offending token and violated constraint
    pub message: String,
}

impl ScenarioError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Parse a whole scenario text into an ordered command sequence.
pub fn parse_scenario(text: &str) -> Result<Vec<ParsedCommand>, ScenarioError> {
    let mut commands = Vec::new();
    // Port blocks reserved so far, for the parse-time overlap check.
    let mut port_blocks: Vec<(u32, u32, usize)> = Vec::new();

    for (line_index, raw_line) in text.lines().enumerate() {
        let line = line_index + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = trimmed.split(' ').filter(|t| !t.is_empty()).collect();
        let mut args = Cursor::new(line, &tokens[1..]);
        let command = match tokens[0] {
            "ProfileServer" => {
                let create = parse_create_servers(&mut args)?;
                reserve_ports(&mut port_blocks, &create, line)?;
                Command::ProfileServer(create)
            }
            "ProximityServer" => {
                let create = parse_create_servers(&mut args)?;
                reserve_ports(&mut port_blocks, &create, line)?;
                Command::ProximityServer(create)
            }
            "StartServer" => Command::StartServer(parse_server_range(&mut args)?),
            "StopServer" => Command::StopServer(parse_server_range(&mut args)?),
            "Neighborhood" => Command::Neighborhood(parse_range_list(&mut args)?),
            "CancelNeighborhood" => Command::CancelNeighborhood(parse_range_list(&mut args)?),
            "Neighbor" => {
                let (source, targets) = parse_neighbor_args(&mut args)?;
                Command::Neighbor { source, targets }
            }
            "CancelNeighbor" => {
                let (source, targets) = parse_neighbor_args(&mut args)?;
                Command::CancelNeighbor { source, targets }
            }
            "Identity" => Command::Identity(parse_create_identities(&mut args)?),
            "CancelIdentity" => {
                let group = args.next_name("name")?;
                let index = args.next_int_in("index", 1, 99_999)? as usize;
                let count = args.next_int_in("count", 1, 99_999)? as usize;
                if index + count > 100_000 {
                    return Err(args.constraint(format!(
                        "index {index} + count {count} exceeds 100000"
                    )));
                }
                Command::CancelIdentity {
                    group,
                    index,
                    count,
                }
            }
            "Activity" => Command::Activity(parse_create_activities(&mut args)?),
            "DeleteActivity" => {
                let group = args.next_name("name")?;
                let index = args.next_int_in("index", 1, 50_000)? as usize;
                let count = args.next_int_in("count", 1, 50_000)? as usize;
                if index + count > 50_001 {
                    return Err(args.constraint(format!(
                        "index {index} + count {count} exceeds 50001"
                    )));
                }
                Command::DeleteActivity {
                    group,
                    index,
                    count,
                }
            }
            "TestQuery" => Command::TestQuery(parse_test_query(&mut args)?),
            "TestQueryActivity" => Command::TestQueryActivity(parse_test_query_activity(&mut args)?),
            "Delay" => {
                let seconds = args.next_decimal("seconds")?;
                if seconds <= 0.0 {
                    return Err(args.constraint(format!("seconds {seconds} must be positive")));
                }
                Command::Delay { seconds }
            }
            "TakeSnapshot" => Command::TakeSnapshot {
                name: args.next_snapshot_name()?,
            },
            "LoadSnapshot" => {
                if !commands.is_empty() {
                    return Err(ScenarioError::new(
                        line,
                        "LoadSnapshot must be the first command of the scenario",
                    ));
                }
                Command::LoadSnapshot {
                    name: args.next_snapshot_name()?,
                }
            }
            "DebugMode" => {
                let value = args.next_name("on/off")?;
                match value.as_str() {
                    "on" => Command::DebugMode { enabled: true },
                    "off" => Command::DebugMode { enabled: false },
                    other => {
                        return Err(args.constraint(format!("'{other}' is not 'on' or 'off'")))
                    }
                }
            }
            unknown => {
                return Err(ScenarioError::new(
                    line,
                    format!("unknown command '{unknown}'"),
                ))
            }
        };
        args.expect_done()?;
        commands.push(ParsedCommand { line, command });
    }

    Ok(commands)
}

fn reserve_ports(
    blocks: &mut Vec<(u32, u32, usize)>,
    create: &CreateServers,
    line: usize,
) -> Result<(), ScenarioError> {
    let start = u32::from(create.base_port);
    let end = start + u32::from(PORT_BLOCK_SIZE) * create.count as u32;
    for (other_start, other_end, other_line) in blocks.iter() {
        if start < *other_end && *other_start < end {
            return Err(ScenarioError::new(
                line,
                format!(
                    "port block {start}..{end} overlaps {other_start}..{other_end} reserved on line {other_line}"
                ),
            ));
        }
    }
    blocks.push((start, end, line));
    Ok(())
}

fn parse_create_servers(args: &mut Cursor<'_>) -> Result<CreateServers, ScenarioError> {
    let group = args.next_name("group")?;
    let count = args.next_int_in("count", 1, 999)? as usize;
    let max_base = 65_535 - i64::from(PORT_BLOCK_SIZE) * count as i64;
    let base_port = args.next_int_in("basePort", 1, max_base)? as u16;
    let latitude = args.next_latitude()?;
    let longitude = args.next_longitude()?;
    let radius = args.next_int_in("radius", 0, 20_000_000)? as u32;
    Ok(CreateServers {
        group,
        count,
        base_port,
        latitude,
        longitude,
        radius,
    })
}

fn parse_server_range(args: &mut Cursor<'_>) -> Result<GroupRange, ScenarioError> {
    let group = args.next_name("group")?;
    let index = args.next_int_in("index", 1, 999)? as usize;
    let count = args.next_int_in("count", 1, 999)? as usize;
    if index + count > 1_000 {
        return Err(args.constraint(format!("index {index} + count {count} exceeds 1000")));
    }
    Ok(GroupRange {
        group,
        index,
        count,
    })
}

fn parse_range_list(args: &mut Cursor<'_>) -> Result<Vec<GroupRange>, ScenarioError> {
    if args.remaining() == 0 || args.remaining() % 3 != 0 {
        return Err(args.constraint(format!(
            "expected triples of (group, index, count), got {} arguments",
            args.remaining()
        )));
    }
    let mut ranges = Vec::with_capacity(args.remaining() / 3);
    while args.remaining() > 0 {
        ranges.push(parse_server_range(args)?);
    }
    Ok(ranges)
}

fn parse_neighbor_args(args: &mut Cursor<'_>) -> Result<(String, Vec<String>), ScenarioError> {
    let source = args.next_name("source")?;
    let mut targets = Vec::new();
    while args.remaining() > 0 {
        targets.push(args.next_name("target")?);
    }
    if targets.is_empty() {
        return Err(args.constraint("at least one target server is required"));
    }
    Ok((source, targets))
}

fn parse_create_identities(args: &mut Cursor<'_>) -> Result<CreateIdentities, ScenarioError> {
    let group = args.next_name("name")?;
    let create_count = args.next_int_in("createCount", 1, 99_999)? as usize;
    let identity_type = args.next_name("type")?;
    let latitude = args.next_latitude()?;
    let longitude = args.next_longitude()?;
    let radius = args.next_int_in("radius", 0, 20_000_000)? as u32;
    let profile_image_mask = args.next_name("profileMask")?;
    let profile_image_chance = args.next_int_in("profileChance", 0, 100)? as u32;
    let thumbnail_mask = args.next_name("thumbMask")?;
    let thumbnail_chance = args.next_int_in("thumbChance", 0, 100)? as u32;
    let servers = parse_server_range(args)?;
    if create_count > 20_000 * servers.count {
        return Err(args.constraint(format!(
            "createCount {create_count} exceeds the capacity of {} servers",
            servers.count
        )));
    }
    Ok(CreateIdentities {
        group,
        create_count,
        identity_type,
        latitude,
        longitude,
        radius,
        profile_image_mask,
        profile_image_chance,
        thumbnail_mask,
        thumbnail_chance,
        servers,
    })
}

fn parse_create_activities(args: &mut Cursor<'_>) -> Result<CreateActivities, ScenarioError> {
    let group = args.next_name("name")?;
    let create_count = args.next_int_in("createCount", 1, 50_000)? as usize;
    let latitude = args.next_latitude()?;
    let longitude = args.next_longitude()?;
    let precision_min = args.next_int_in("precMin", 0, 1_000)? as u32;
    let precision_max = args.next_int_in("precMax", 0, 1_000)? as u32;
    if precision_min > precision_max {
        return Err(args.constraint(format!(
            "precMin {precision_min} exceeds precMax {precision_max}"
        )));
    }
    let radius = args.next_int_in("radius", 0, 20_000_000)? as u32;
    let start_from = args.next_int_in("startFrom", -86_000, 86_000)?;
    let start_to = args.next_int_in("startTo", -86_000, 86_000)?;
    if start_from > start_to {
        return Err(args.constraint(format!("startFrom {start_from} exceeds startTo {start_to}")));
    }
    let lifetime_from = args.next_int_in("lifeFrom", 1, 86_400)?;
    let lifetime_to = args.next_int_in("lifeTo", 1, 86_400)?;
    if lifetime_from > lifetime_to {
        return Err(args.constraint(format!(
            "lifeFrom {lifetime_from} exceeds lifeTo {lifetime_to}"
        )));
    }
    if start_from + lifetime_from <= 0 {
        return Err(args.constraint(format!(
            "startFrom {start_from} + lifeFrom {lifetime_from} must be positive"
        )));
    }
    if start_to + lifetime_to > 86_400 {
        return Err(args.constraint(format!(
            "startTo {start_to} + lifeTo {lifetime_to} exceeds 86400"
        )));
    }
    let group_token = args.next_name("group")?;
    let index = args.next_int_in("index", 1, 99_999)? as usize;
    let count = args.next_int_in("count", 1, 99_999)? as usize;
    if index + count > 100_000 {
        return Err(args.constraint(format!("index {index} + count {count} exceeds 100000")));
    }
    Ok(CreateActivities {
        group,
        create_count,
        latitude,
        longitude,
        precision_min,
        precision_max,
        radius,
        start_from,
        start_to,
        lifetime_from,
        lifetime_to,
        owners: GroupRange {
            group: group_token,
            index,
            count,
        },
    })
}

fn parse_test_query(args: &mut Cursor<'_>) -> Result<TestQuery, ScenarioError> {
    let servers = parse_server_range(args)?;
    let name_filter = args.next_name("nameFilter")?;
    let type_filter = args.next_name("typeFilter")?;
    let include_images = args.next_bool("includeImages")?;
    let (location, radius) = parse_location_filter(args)?;
    Ok(TestQuery {
        servers,
        name_filter,
        type_filter,
        include_images,
        location,
        radius,
    })
}

fn parse_test_query_activity(args: &mut Cursor<'_>) -> Result<TestQueryActivity, ScenarioError> {
    let servers = parse_server_range(args)?;
    let type_filter = args.next_name("typeFilter")?;
    let start_not_after = args.next_time_or_any("startNotAfter")?;
    let expiration_not_before = args.next_time_or_any("expirationNotBefore")?;
    if let (Some(start), Some(expiration)) = (start_not_after, expiration_not_before) {
        if start >= expiration {
            return Err(args.constraint(format!(
                "startNotAfter {start} must be before expirationNotBefore {expiration}"
            )));
        }
    }
    let (location, radius) = parse_location_filter(args)?;
    Ok(TestQueryActivity {
        servers,
        type_filter,
        start_not_after,
        expiration_not_before,
        location,
        radius,
    })
}

fn parse_location_filter(
    args: &mut Cursor<'_>,
) -> Result<(Option<(f64, f64)>, u32), ScenarioError> {
    let lat_token = args.next_name("lat")?;
    let lon_token = args.next_name("lon")?;
    let location = match (lat_token.as_str(), lon_token.as_str()) {
        (NO_LOCATION, NO_LOCATION) => None,
        (NO_LOCATION, _) | (_, NO_LOCATION) => {
            return Err(args.constraint("lat and lon must both be NO_LOCATION or both numeric"))
        }
        (lat, lon) => Some((
            args.decimal_in("lat", lat, -90.0, 90.0)?,
            args.longitude_value(lon)?,
        )),
    };
    let radius = args.next_int_in("radius", 0, 20_000_000)? as u32;
    Ok((location, radius))
}

/// Token cursor over one command's arguments.
struct Cursor<'a> {
    line: usize,
    tokens: &'a [&'a str],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: usize, tokens: &'a [&'a str]) -> Self {
        Self {
            line,
            tokens,
            pos: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.tokens.len() - self.pos
    }

    fn constraint(&self, message: impl Into<String>) -> ScenarioError {
        ScenarioError::new(self.line, message.into())
    }

    fn next_token(&mut self, what: &str) -> Result<&'a str, ScenarioError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| ScenarioError::new(self.line, format!("missing argument <{what}>")))?;
        self.pos += 1;
        Ok(token)
    }

    fn next_name(&mut self, what: &str) -> Result<String, ScenarioError> {
        Ok(self.next_token(what)?.to_string())
    }

    fn next_snapshot_name(&mut self) -> Result<String, ScenarioError> {
        let name = self.next_name("name")?;
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(self.constraint(format!("snapshot name '{name}' must be a plain name")));
        }
        Ok(name)
    }

    fn next_int_in(&mut self, what: &str, min: i64, max: i64) -> Result<i64, ScenarioError> {
        let token = self.next_token(what)?;
        let value: i64 = token.parse().map_err(|_| {
            ScenarioError::new(
                self.line,
                format!("<{what}> '{token}' is not a base-10 integer"),
            )
        })?;
        if value < min || value > max {
            return Err(self.constraint(format!(
                "<{what}> {value} out of range [{min}, {max}]"
            )));
        }
        Ok(value)
    }

    fn next_decimal(&mut self, what: &str) -> Result<f64, ScenarioError> {
        let token = self.next_token(what)?;
        self.decimal_value(what, token)
    }

    fn decimal_value(&self, what: &str, token: &str) -> Result<f64, ScenarioError> {
        // Invariant culture: '.' separator, optional sign, no exponents.
        let valid = token
            .strip_prefix('-')
            .unwrap_or(token)
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.');
        if !valid {
            return Err(self.constraint(format!("<{what}> '{token}' is not a decimal number")));
        }
        token.parse::<f64>().map_err(|_| {
            ScenarioError::new(
                self.line,
                format!("<{what}> '{token}' is not a decimal number"),
            )
        })
    }

    fn decimal_in(
        &self,
        what: &str,
        token: &str,
        min: f64,
        max: f64,
    ) -> Result<f64, ScenarioError> {
        let value = self.decimal_value(what, token)?;
        if value < min || value > max {
            return Err(self.constraint(format!(
                "<{what}> {value} out of range [{min}, {max}]"
            )));
        }
        Ok(value)
    }

    fn longitude_value(&self, token: &str) -> Result<f64, ScenarioError> {
        let value = self.decimal_value("lon", token)?;
        if value <= -180.0 || value > 180.0 {
            return Err(self.constraint(format!("<lon> {value} out of range (-180, 180]")));
        }
        Ok(value)
    }

    fn next_latitude(&mut self) -> Result<f64, ScenarioError> {
        let token = self.next_token("lat")?;
        self.decimal_in("lat", token, -90.0, 90.0)
    }

    fn next_longitude(&mut self) -> Result<f64, ScenarioError> {
        let token = self.next_token("lon")?;
        self.longitude_value(token)
    }

    fn next_bool(&mut self, what: &str) -> Result<bool, ScenarioError> {
        let token = self.next_token(what)?;
        match token {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(self.constraint(format!("<{what}> '{other}' is not 'true' or 'false'"))),
        }
    }

    fn next_time_or_any(&mut self, what: &str) -> Result<Option<i64>, ScenarioError> {
        let token = self.next_token(what)?;
        if token == ANY {
            return Ok(None);
        }
        let value: i64 = token.parse().map_err(|_| {
            ScenarioError::new(
                self.line,
                format!("<{what}> '{token}' is not a base-10 integer or ANY"),
            )
        })?;
        Ok(Some(value))
    }

    fn expect_done(&self) -> Result<(), ScenarioError> {
        if self.pos < self.tokens.len() {
            return Err(self.constraint(format!(
                "unexpected trailing argument '{}'",
                self.tokens[self.pos]
            )));
        }
        Ok(())
    }
}
