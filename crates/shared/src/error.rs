//! The tagged error taxonomy shared by both storage backends and the HTTP
//! edge. Every `ChatService` operation returns either its success payload or
//! exactly one of these variants; `Display` renders the bare tag name (no
//! punctuation, no interpolated detail) because the tag *is* the wire
//! contract — the edge echoes `to_string()` verbatim as the response body's
//! `error` field.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChitterError {
    // --- Authentication ---------------------------------------------------
    #[error("InvalidUserToken")]
    InvalidUserToken,
    #[error("InvalidAdminToken")]
    InvalidAdminToken,
    #[error("InvalidAdminTokenOrNonAdminUser")]
    InvalidAdminTokenOrNonAdminUser,
    #[error("InvalidToken")]
    InvalidToken,

    // --- Scope / visibility -------------------------------------------------
    #[error("UserNotFoundInAdminsRoom")]
    UserNotFoundInAdminsRoom,
    #[error("ChannelNotFoundInUsersRoom")]
    ChannelNotFoundInUsersRoom,
    #[error("UserIsNotMemberOfPrivateChannel")]
    UserIsNotMemberOfPrivateChannel,
    #[error("RoomNotFound")]
    RoomNotFound,
    #[error("ChannelNotFound")]
    ChannelNotFound,
    #[error("UserNotFound")]
    UserNotFound,
    #[error("MessageNotFound")]
    MessageNotFound,
    #[error("AttachmentNotFound")]
    AttachmentNotFound,
    #[error("ChannelNotFoundOrNotPrivate")]
    ChannelNotFoundOrNotPrivate,

    // --- Policy -------------------------------------------------------------
    #[error("UserIsNotAdminAndRoomIsAdminInviteOnly")]
    UserIsNotAdminAndRoomIsAdminInviteOnly,
    #[error("UserNotAuthorizedToDeleteThisMessage")]
    UserNotAuthorizedToDeleteThisMessage,
    #[error("UserNotAuthorizedToEditThisMessage")]
    UserNotAuthorizedToEditThisMessage,
    #[error("MessageCannotTargetBothAChannelAndADirectUser")]
    MessageCannotTargetBothAChannelAndADirectUser,
    #[error("EitherChannelIdOrDirectMessageUserIdMustBeProvided")]
    EitherChannelIdOrDirectMessageUserIdMustBeProvided,
    #[error("DisplayNameAlreadyExistsInTheRoom")]
    DisplayNameAlreadyExistsInTheRoom,

    // --- Content --------------------------------------------------------------
    #[error("InvalidContentStructure")]
    InvalidContentStructure,
    #[error("InvalidTextContent")]
    InvalidTextContent,
    #[error("InvalidFacet")]
    InvalidFacet,
    #[error("InvalidEmbed")]
    InvalidEmbed,
    #[error("InvalidAttachmentIDs")]
    InvalidAttachmentIDs,
    #[error("InvalidOrNonImageLogoAttachment")]
    InvalidOrNonImageLogoAttachment,
    #[error("InvalidOrNonImageAvatarAttachment")]
    InvalidOrNonImageAvatarAttachment,
    #[error("InvalidFileType")]
    InvalidFileType,

    // --- Credentials ------------------------------------------------------
    #[error("InvalidInviteCode")]
    InvalidInviteCode,
    #[error("InvalidOrExpiredTransferCode")]
    InvalidOrExpiredTransferCode,
    #[error("NoValidTokens")]
    NoValidTokens,

    // --- Generic / failure --------------------------------------------------
    #[error("CouldNotCreateRoomAndAdmin")]
    CouldNotCreateRoomAndAdmin,
    #[error("CouldNotCreateInviteCode")]
    CouldNotCreateInviteCode,
    #[error("CouldNotCreateUserFromInviteCode")]
    CouldNotCreateUserFromInviteCode,
    #[error("CouldNotRemoveUser")]
    CouldNotRemoveUser,
    #[error("CouldNotCreateMessage")]
    CouldNotCreateMessage,
    #[error("CouldNotRemoveMessage")]
    CouldNotRemoveMessage,
    #[error("CouldNotEditMessage")]
    CouldNotEditMessage,
    #[error("CouldNotUpdateRoom")]
    CouldNotUpdateRoom,
    #[error("CouldNotUpdateUser")]
    CouldNotUpdateUser,
    #[error("CouldNotChangeUserRole")]
    CouldNotChangeUserRole,
    #[error("CouldNotGetMessages")]
    CouldNotGetMessages,
    #[error("CouldNotGetUsers")]
    CouldNotGetUsers,
    #[error("CouldNotRetrieveUserDetails")]
    CouldNotRetrieveUserDetails,
    #[error("CouldNotRetrieveChannels")]
    CouldNotRetrieveChannels,
    #[error("CouldNotCreateChannel")]
    CouldNotCreateChannel,
    #[error("CouldNotRemoveChannel")]
    CouldNotRemoveChannel,
    #[error("CouldNotUpdateChannel")]
    CouldNotUpdateChannel,
    #[error("CouldNotAddUserToChannel")]
    CouldNotAddUserToChannel,
    #[error("CouldNotRemoveUserFromChannel")]
    CouldNotRemoveUserFromChannel,
    #[error("CouldNotCreateTransferCode")]
    CouldNotCreateTransferCode,
    #[error("CouldNotFetchUserDataFromTransferCode")]
    CouldNotFetchUserDataFromTransferCode,
    #[error("CouldNotUploadAttachment")]
    CouldNotUploadAttachment,
    #[error("CouldNotRemoveAttachment")]
    CouldNotRemoveAttachment,
    #[error("CouldNotCreateTables")]
    CouldNotCreateTables,
    #[error("InvalidParameters")]
    InvalidParameters,
    #[error("UnknownServerError")]
    UnknownServerError,
}

impl ChitterError {
    /// The stable wire tag for this error, identical to its `Display` form.
    /// Kept as a separate method so callers reaching for "the tag" don't
    /// have to know that tag == Display by convention.
    pub fn tag(&self) -> String {
        self.to_string()
    }
}
