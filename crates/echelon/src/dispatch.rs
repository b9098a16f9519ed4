//! Request dispatch: which variant may call what, and the call itself.
//!
//! Every request first refreshes the session. A session that is gone is
//! answered with `PermissionDenied("session expired")`, a request the
//! variant may not make with `PermissionDenied`.

use echelon_protocol::{Request, Response, SessionId, Variant};

use crate::{Echelon, ServiceError};

/// Whether a session of `variant` may make `request`.
pub fn is_allowed(variant: Variant, request: &Request) -> bool {
    use Request::*;
    use Variant::*;

    match request {
        KeepAlive | Logout => true,

        GetTankList
        | SelectTank { .. }
        | RequestJoin { .. }
        | GetRank
        | GetAccountPoints
        | GetPointsForRank { .. }
        | GetRanksOfTanks { .. }
        | CheckCurrentVersion
        | CreateTank { .. }
        | UpdateTank { .. }
        | DeleteTank { .. } => variant == Player,

        GetGameServerList => matches!(variant, Player | Admin | HealthMonitor),
        GetUserCount => matches!(variant, Admin | HealthMonitor),
        GetUserList
        | KickUser { .. }
        | BanUser { .. }
        | UnbanUser { .. }
        | ForcePlayerLimit { .. }
        | GetAccountList
        | GetAccountByName { .. }
        | CreateAccount { .. }
        | EditAccountByName { .. }
        | SetAccountPassword { .. }
        | DeleteAccountByName { .. } => variant == Admin,

        GetMapList | HashIsValid { .. } | DownloadMap { .. } => {
            matches!(variant, Player | MapEditor | GameServer)
        }
        UploadMap { .. } | RemoveMap { .. } => variant == MapEditor,

        SetMaxPlayerLimit { .. }
        | PlayerLeft { .. }
        | SetCurrentMap { .. }
        | SetCurrentGameMode { .. }
        | SendStatistics { .. } => variant == GameServer,
    }
}

/// Short name for log fields.
fn request_name(request: &Request) -> &'static str {
    match request {
        Request::KeepAlive => "KeepAlive",
        Request::Logout => "Logout",
        Request::GetTankList => "GetTankList",
        Request::SelectTank { .. } => "SelectTank",
        Request::RequestJoin { .. } => "RequestJoin",
        Request::GetRank => "GetRank",
        Request::GetAccountPoints => "GetAccountPoints",
        Request::GetPointsForRank { .. } => "GetPointsForRank",
        Request::GetRanksOfTanks { .. } => "GetRanksOfTanks",
        Request::CheckCurrentVersion => "CheckCurrentVersion",
        Request::CreateTank { .. } => "CreateTank",
        Request::UpdateTank { .. } => "UpdateTank",
        Request::DeleteTank { .. } => "DeleteTank",
        Request::GetGameServerList => "GetGameServerList",
        Request::GetUserList => "GetUserList",
        Request::GetUserCount => "GetUserCount",
        Request::GetMapList => "GetMapList",
        Request::HashIsValid { .. } => "HashIsValid",
        Request::DownloadMap { .. } => "DownloadMap",
        Request::UploadMap { .. } => "UploadMap",
        Request::RemoveMap { .. } => "RemoveMap",
        Request::KickUser { .. } => "KickUser",
        Request::BanUser { .. } => "BanUser",
        Request::UnbanUser { .. } => "UnbanUser",
        Request::ForcePlayerLimit { .. } => "ForcePlayerLimit",
        Request::GetAccountList => "GetAccountList",
        Request::GetAccountByName { .. } => "GetAccountByName",
        Request::CreateAccount { .. } => "CreateAccount",
        Request::EditAccountByName { .. } => "EditAccountByName",
        Request::SetAccountPassword { .. } => "SetAccountPassword",
        Request::DeleteAccountByName { .. } => "DeleteAccountByName",
        Request::SetMaxPlayerLimit { .. } => "SetMaxPlayerLimit",
        Request::PlayerLeft { .. } => "PlayerLeft",
        Request::SetCurrentMap { .. } => "SetCurrentMap",
        Request::SetCurrentGameMode { .. } => "SetCurrentGameMode",
        Request::SendStatistics { .. } => "SendStatistics",
    }
}

impl Echelon {
    /// Runs one request on behalf of session `id`.
    pub async fn dispatch(&self, id: SessionId, request: Request) -> Result<Response, ServiceError> {
        let session = self.registry().touch(id).await?;
        let variant = session.variant();
        let op = request_name(&request);

        if !is_allowed(variant, &request) {
            tracing::debug!(session_id = %id, %variant, op, "request not allowed for variant");
            return Err(ServiceError::permission_denied(format!(
                "{op} is not available to {variant} sessions"
            )));
        }
        tracing::trace!(session_id = %id, %variant, op, "dispatching request");

        let owner = session.owner_name.as_str();
        let response = match request {
            Request::KeepAlive => Response::Done,
            Request::Logout => {
                self.registry().remove(id).await;
                Response::Done
            }

            Request::GetTankList => Response::Tanks {
                tanks: self.tank_list(&session),
            },
            Request::SelectTank { tank_name } => {
                self.select_tank(id, &tank_name).await?;
                Response::Done
            }
            Request::RequestJoin { server_name } => Response::Token {
                token: self.request_join(id, &server_name).await?,
            },
            Request::GetRank => Response::Rank {
                rank: self.rank(owner).await?,
            },
            Request::GetAccountPoints => Response::Points {
                points: self.account_points(owner).await?,
            },
            Request::GetPointsForRank { rank } => Response::Points {
                points: self.points_for_rank(rank)?,
            },
            Request::GetRanksOfTanks { tank_names } => Response::Ranks {
                ranks: self.ranks_of_tanks(&tank_names).await?,
            },
            Request::CheckCurrentVersion => Response::Version {
                version: self.client_version().to_string(),
            },
            Request::CreateTank { tank } => {
                self.create_tank(&session, tank).await?;
                Response::Done
            }
            Request::UpdateTank { old_name, tank } => {
                self.update_tank(&session, &old_name, tank).await?;
                Response::Done
            }
            Request::DeleteTank { tank_name } => {
                self.delete_tank(&session, &tank_name).await?;
                Response::Done
            }

            Request::GetGameServerList => Response::Servers {
                servers: self.game_server_list().await,
            },
            Request::GetUserList => Response::Users {
                users: self.user_list().await,
            },
            Request::GetUserCount => Response::Count {
                count: self.user_count().await,
            },

            Request::GetMapList => Response::Maps {
                filenames: self.map_list().await?,
            },
            Request::HashIsValid { filename, hash } => Response::Valid {
                valid: self.hash_is_valid(&filename, &hash).await?,
            },
            Request::DownloadMap { filename } => {
                let map = self.download_map(&filename).await?;
                Response::Map {
                    data: map.data.to_vec(),
                    filename: map.filename,
                    title: map.title,
                }
            }
            Request::UploadMap {
                filename,
                title,
                data,
            } => {
                self.upload_map(&filename, &title, data).await?;
                Response::Done
            }
            Request::RemoveMap { filename } => {
                self.remove_map(&filename).await?;
                Response::Done
            }

            Request::KickUser { name } => {
                let kicked = self.kick_user(&name).await?;
                tracing::info!(admin = owner, user = %name, kicked, "user kicked");
                Response::Done
            }
            Request::BanUser { name } => {
                self.ban_user(&name).await?;
                Response::Done
            }
            Request::UnbanUser { name } => {
                self.unban_user(&name).await?;
                Response::Done
            }
            Request::ForcePlayerLimit { server_name, limit } => {
                self.force_player_limit(&server_name, limit).await?;
                Response::Done
            }
            Request::GetAccountList => Response::Accounts {
                accounts: self.account_list().await?,
            },
            Request::GetAccountByName { name } => Response::Account {
                account: self.account_by_name(&name).await?,
            },
            Request::CreateAccount {
                username,
                password,
                email,
                user_level,
            } => {
                self.create_account(&username, &password, &email, user_level).await?;
                Response::Done
            }
            Request::EditAccountByName { name, account } => {
                self.edit_account(&name, account).await?;
                Response::Done
            }
            Request::SetAccountPassword { name, password } => {
                self.set_account_password(&name, &password).await?;
                Response::Done
            }
            Request::DeleteAccountByName { name } => {
                self.delete_account(&name).await?;
                Response::Done
            }

            Request::SetMaxPlayerLimit { limit } => {
                self.set_max_player_limit(id, limit).await?;
                Response::Done
            }
            Request::PlayerLeft { tank_name } => {
                self.player_left(id, &tank_name).await?;
                Response::Done
            }
            Request::SetCurrentMap { filename } => {
                self.set_current_map(id, filename).await?;
                Response::Done
            }
            Request::SetCurrentGameMode { mode } => {
                self.set_current_game_mode(id, mode).await?;
                Response::Done
            }
            Request::SendStatistics { records } => {
                self.record_statistics(&records).await;
                Response::Done
            }
        };

        Ok(response)
    }
}
