/*
 *  Copyright 2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Diesel schema for the tasks table.
//!
//! UUIDs are stored as 16-byte BLOBs and timestamps as RFC3339 TEXT;
//! conversion to domain types happens in the store's DB models.

diesel::table! {
    tasks (id) {
        id -> Binary,
        kind -> Text,
        payload -> Text,
        priority -> Integer,
        state -> Text,
        attempt_count -> Integer,
        max_attempts -> Integer,
        eligible_at -> Text,
        lease_id -> Nullable<Binary>,
        lease_expires_at -> Nullable<Text>,
        last_error -> Nullable<Text>,
        version -> BigInt,
        created_at -> Text,
        updated_at -> Text,
    }
}
