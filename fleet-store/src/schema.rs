/// Schema bootstrap, written in the SQL subset PostgreSQL and SQLite share:
/// `$n` placeholders, `ON CONFLICT` upserts, partial unique indexes. Entity
/// payloads are stored as JSON text, timestamps as fixed-width RFC 3339 so
/// lexicographic comparison matches chronological order.
pub const STATEMENTS: &[&str] = &[
    r#"
create table if not exists players
( id           bigint primary key
, agent_symbol text   not null unique
, token        text   not null
, credits      bigint not null
, created_at   text   not null
)"#,
    r#"
create table if not exists ships
( player_id   bigint not null
, ship_symbol text   not null
, entry       text   not null
, updated_at  text   not null
, primary key (player_id, ship_symbol)
)"#,
    r#"
create table if not exists waypoints
( waypoint_symbol text primary key
, system_symbol   text not null
, entry           text not null
, synced_at       text not null
)"#,
    r#"
create index if not exists waypoints_system_idx on waypoints (system_symbol)"#,
    r#"
create table if not exists system_graphs
( system_symbol text primary key
, entry         text not null
, last_updated  text not null
)"#,
    r#"
create table if not exists containers
( container_id   text   primary key
, player_id      bigint not null
, container_type text   not null
, config         text   not null
, status         text   not null
, restart_policy text   not null
, restart_count  bigint not null
, started_at     text   not null
, stopped_at     text
, exit_code      bigint
)"#,
    r#"
create index if not exists containers_player_idx on containers (player_id)"#,
    r#"
create table if not exists container_logs
( log_id       bigint not null
, container_id text   not null
, player_id    bigint not null
, timestamp    text   not null
, level        text   not null
, message      text   not null
, hash         text   not null
, count        bigint not null
, first_seen   text   not null
, last_seen    text   not null
, primary key (container_id, log_id)
)"#,
    r#"
create index if not exists container_logs_dedup_idx on container_logs (container_id, hash, first_seen)"#,
    r#"
create table if not exists ship_assignments
( player_id      bigint not null
, ship_symbol    text   not null
, container_id   text   not null
, status         text   not null
, claimed_at     text   not null
, released_at    text
, release_reason text
)"#,
    r#"
create unique index if not exists ship_assignments_active_uq
    on ship_assignments (player_id, ship_symbol)
 where status = 'active'"#,
    r#"
create table if not exists contracts
( contract_id text   not null
, player_id   bigint not null
, entry       text   not null
, updated_at  text   not null
, primary key (player_id, contract_id)
)"#,
    r#"
create table if not exists market_data
( player_id       bigint not null
, waypoint_symbol text   not null
, entry           text   not null
, scanned_at      text   not null
, primary key (player_id, waypoint_symbol)
)"#,
    r#"
create table if not exists routes
( route_id    text   not null
, player_id   bigint not null
, ship_symbol text   not null
, entry       text   not null
, status      text   not null
, created_at  text   not null
, primary key (player_id, route_id)
)"#,
];
