//! Redis 側で原子的に実行する Lua スクリプト

/// KEYS[1]=ハッシュ。全フィールドを返して削除する
pub const HASH_GET_AND_CLEAR: &str = r#"
local values = redis.call('HGETALL', KEYS[1])
redis.call('DEL', KEYS[1])
return values
"#;

/// KEYS[1]=ソート済みセット, ARGV[1]=係数, ARGV[2]=下限
pub const ZSET_DECAY: &str = r#"
local members = redis.call('ZRANGE', KEYS[1], 0, -1, 'WITHSCORES')
local factor = tonumber(ARGV[1])
local floor = tonumber(ARGV[2])
local decayed = 0
local removed = 0
for i = 1, #members, 2 do
  local score = tonumber(members[i + 1]) * factor
  if score < floor then
    redis.call('ZREM', KEYS[1], members[i])
    removed = removed + 1
  else
    redis.call('ZADD', KEYS[1], score, members[i])
    decayed = decayed + 1
  end
end
return {decayed, removed}
"#;

/// KEYS[1]=ロックキー, ARGV[1]=保持者トークン
pub const RELEASE_LOCK: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// KEYS[1]=閲覧マーカー, KEYS[2]=保留カウンター, ARGV[1]=TTL(ms), ARGV[2]=フィールド
pub const CHECK_MARK_INCREMENT: &str = r#"
if redis.call('SET', KEYS[1], '1', 'NX', 'PX', ARGV[1]) then
  redis.call('HINCRBY', KEYS[2], ARGV[2], 1)
  return 1
end
return 0
"#;

/// KEYS[1]=一覧, ARGV[1]=TTL(ms, 0 は無期限), ARGV[2..]=要素
pub const LIST_REPLACE: &str = r#"
redis.call('DEL', KEYS[1])
if #ARGV > 1 then
  redis.call('RPUSH', KEYS[1], unpack(ARGV, 2))
  local ttl = tonumber(ARGV[1])
  if ttl > 0 then
    redis.call('PEXPIRE', KEYS[1], ttl)
  end
end
return 1
"#;

/// KEYS[1]=一覧, ARGV[1]=要素, ARGV[2]=最大長
pub const LIST_PUSH_FRONT_BOUNDED: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('LPUSH', KEYS[1], ARGV[1])
redis.call('LTRIM', KEYS[1], 0, tonumber(ARGV[2]) - 1)
return 1
"#;

/// KEYS[1]=一覧, ARGV[1]=ID フィールド, ARGV[2]=期待する末尾 ID, ARGV[3]=追加する ID,
/// ARGV[4]=要素, ARGV[5]=最大長
/// 戻り値: {1=追加 0=末尾が変わった 2=見送り, 件数, 末尾要素}
pub const LIST_PUSH_BACK_IF_TAIL: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {2, 0, false}
end
local field = ARGV[1]
local len = redis.call('LLEN', KEYS[1])
local last = redis.call('LINDEX', KEYS[1], -1)
local tail = nil
if last then
  local ok, decoded = pcall(cjson.decode, last)
  if ok and type(decoded) == 'table' then
    tail = tonumber(decoded[field])
  end
end
if tail ~= tonumber(ARGV[2]) then
  return {0, len, last}
end
if len >= tonumber(ARGV[5]) then
  return {2, len, last}
end
local target = tonumber(ARGV[3])
for _, raw in ipairs(redis.call('LRANGE', KEYS[1], 0, -1)) do
  local ok, decoded = pcall(cjson.decode, raw)
  if ok and type(decoded) == 'table' and tonumber(decoded[field]) == target then
    return {2, len, last}
  end
end
redis.call('RPUSH', KEYS[1], ARGV[4])
return {1, len + 1, ARGV[4]}
"#;

/// KEYS[1]=一覧。キーが無ければ nil
pub const LIST_RANGE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return false
end
return redis.call('LRANGE', KEYS[1], 0, -1)
"#;

/// KEYS[1]=一覧, ARGV[1]=ID フィールド, ARGV[2]=ID
/// 戻り値: {削除したか, 残り件数, 末尾要素}
pub const LIST_REMOVE_ENTRY: &str = r#"
local items = redis.call('LRANGE', KEYS[1], 0, -1)
local field = ARGV[1]
local target = tonumber(ARGV[2])
local removed = 0
for _, raw in ipairs(items) do
  local ok, decoded = pcall(cjson.decode, raw)
  if ok and type(decoded) == 'table' and tonumber(decoded[field]) == target then
    redis.call('LREM', KEYS[1], 1, raw)
    removed = 1
    break
  end
end
local remaining = redis.call('LLEN', KEYS[1])
local last = redis.call('LINDEX', KEYS[1], -1)
return {removed, remaining, last}
"#;

/// KEYS[1]=一覧, ARGV[1]=index, ARGV[2]=期待値, ARGV[3]=置換後
pub const LIST_COMPARE_AND_SET: &str = r#"
local index = tonumber(ARGV[1])
if redis.call('LINDEX', KEYS[1], index) == ARGV[2] then
  redis.call('LSET', KEYS[1], index, ARGV[3])
  return 1
end
return 0
"#;
